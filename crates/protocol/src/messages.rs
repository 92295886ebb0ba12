use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Joins a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room: String,
    pub user_name: String,
}

/// Sends a text message to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
    pub room: String,
    pub user_name: String,
    pub message: String,
}

/// Asks the server to open a file transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFileTransferRequest {
    pub room: String,
    pub user_name: String,
    pub file_name: String,
    /// Declared total size in bytes. Checked against the cap, never
    /// reconciled against the bytes actually received.
    pub file_size: u64,
    #[serde(default)]
    pub file_type: String,
}

/// Sends one chunk of an open transfer.
///
/// The `chunk` field is base64-encoded in JSON. Binary frames carry the
/// same fields in their header and the raw bytes after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkRequest {
    #[serde(alias = "fileId")]
    pub transfer_id: String,
    #[serde(with = "base64_bytes")]
    pub chunk: Vec<u8>,
    /// Echoed in the acknowledgement; never used for ordering.
    #[serde(default)]
    pub chunk_index: u64,
    #[serde(default)]
    pub is_last_chunk: bool,
    /// Optional SHA-256 hex digest of `chunk`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// Server payloads
// ---------------------------------------------------------------------------

/// A text line delivered to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub user: String,
    pub text: String,
}

/// Authorizes the initiator to start streaming chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferReady {
    pub transfer_id: String,
}

/// Identifies the transfer a `file-transfer-error` refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferErrorPayload {
    pub transfer_id: String,
}

/// Per-chunk acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceived {
    pub transfer_id: String,
    pub chunk_index: u64,
}

/// A fully reassembled file broadcast to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMessage {
    pub user: String,
    pub file_name: String,
    /// Size declared when the transfer started.
    pub file_size: u64,
    pub file_type: String,
    #[serde(with = "base64_bytes")]
    pub file_content: Vec<u8>,
    /// Milliseconds between allocation and last-chunk processing.
    pub transfer_time: u64,
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
