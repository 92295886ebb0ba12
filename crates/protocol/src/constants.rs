use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response.
///
/// Acts as a read deadline that only a pong resets: if no pong arrives
/// within this window the connection is considered dead, even if other
/// frames keep coming. Set high enough to tolerate a client that
/// is busy slicing a large file between chunks.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the server pings each client.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum WebSocket message size in bytes (100 MiB).
///
/// Independent of [`MAX_FILE_SIZE`]: this bounds a single frame, not a
/// whole transfer.
pub const WS_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Maximum declared size of a transferred file (100 MiB).
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default listening port when `PORT` is not set.
pub const DEFAULT_PORT: u16 = 3000;

/// Display name used for server-generated room notices.
pub const SYSTEM_USER: &str = "GHOST💀";

/// WebSocket event type identifier.
///
/// Names follow the kebab-case event vocabulary; the camelCase names used by
/// older browser clients are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Client -> server
    #[serde(rename = "join-room", alias = "joinRoom")]
    JoinRoom,
    #[serde(rename = "chat-message", alias = "chatMessage")]
    ChatMessage,
    #[serde(rename = "start-file-transfer")]
    StartFileTransfer,
    #[serde(rename = "file-chunk")]
    FileChunk,

    // Server -> client
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "file-transfer-ready")]
    FileTransferReady,
    #[serde(rename = "file-transfer-error")]
    FileTransferError,
    #[serde(rename = "file-message", alias = "fileMessage")]
    FileMessage,
    #[serde(rename = "chunk-received")]
    ChunkReceived,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown event types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Machine-readable classification carried by every error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Declared or buffered size exceeds the configured cap.
    OversizedFile,
    /// Chunk references a transfer id that is not open.
    InvalidTransfer,
    /// Appending or reassembling a chunk failed.
    ProcessingFailed,
    /// Chunk payload does not match its SHA-256 checksum.
    ChecksumMismatch,
    /// Transfer was evicted after sitting idle too long.
    TransferExpired,
    /// Malformed envelope or payload.
    BadRequest,
    /// Event type the server does not handle.
    NotImplemented,
}
