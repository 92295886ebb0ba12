//! Binary chunk frames: 4-byte big-endian header length + JSON header + raw chunk bytes.

use hackchat_protocol::FileChunkRequest;
use serde::{Deserialize, Serialize};

/// Header of a binary `file-chunk` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryChunkHeader {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(alias = "fileId")]
    pub transfer_id: String,
    #[serde(default)]
    pub chunk_index: u64,
    #[serde(default)]
    pub is_last_chunk: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

impl BinaryChunkHeader {
    /// Combines the header with its payload into the JSON-equivalent request.
    pub fn into_request(self, chunk: Vec<u8>) -> FileChunkRequest {
        FileChunkRequest {
            transfer_id: self.transfer_id,
            chunk,
            chunk_index: self.chunk_index,
            is_last_chunk: self.is_last_chunk,
            checksum: self.checksum,
        }
    }
}

/// Parses a raw binary WebSocket frame into its header and chunk bytes.
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn parse_binary_chunk(data: &[u8]) -> Result<(BinaryChunkHeader, Vec<u8>), ParseError> {
    let Some((len_bytes, rest)) = data.split_first_chunk::<4>() else {
        return Err(ParseError::TooShort);
    };
    let header_len = u32::from_be_bytes(*len_bytes) as usize;

    if rest.len() < header_len {
        return Err(ParseError::HeaderTruncated {
            expected: header_len,
            got: rest.len(),
        });
    }

    let (header_bytes, payload) = rest.split_at(header_len);
    let header: BinaryChunkHeader =
        serde_json::from_slice(header_bytes).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    Ok((header, payload.to_vec()))
}

/// Encodes a binary chunk frame.
pub fn encode_binary_chunk(
    header: &BinaryChunkHeader,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Errors from binary frame parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("message too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),
}
