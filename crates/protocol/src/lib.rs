pub mod constants;
pub mod envelope;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::{ErrorKind, EventType};
pub use envelope::{Message, PayloadError, WsError};
pub use messages::{
    ChatMessageRequest, ChunkReceived, FileChunkRequest, FileMessage, FileTransferReady,
    JoinRoomRequest, StartFileTransferRequest, TextMessage, TransferErrorPayload,
};
