//! Chunked file transfer: the transfer table and the lifecycle that turns a
//! start request plus a stream of chunks into one reassembled file message.
//!
//! A transfer is `NONE -> OPEN -> COMPLETING -> NONE`: a start request
//! allocates an entry, chunks are appended in arrival order, and the chunk
//! flagged as last reassembles the file. The entry is removed once the file
//! is delivered, or reopened without its last chunk if delivery fails.

mod chunked;
mod manager;
mod table;
mod types;

pub use chunked::{ReassemblyError, checksum_bytes, reassemble, verify_checksum};
pub use manager::{ChunkOutcome, ManagerConfig, TransferManager};
pub use table::{TransferEntry, TransferTable};
pub use types::{ConnectionId, ExpiredTransfer, Transfer, TransferId, TransferMeta};

use hackchat_protocol::ErrorKind;

const MIB: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("declared size {size} exceeds limit {limit}")]
    OversizedFile { size: u64, limit: u64 },

    #[error("transfer {id} would buffer {buffered} bytes, limit {limit}")]
    BufferLimitExceeded { id: String, buffered: u64, limit: u64 },

    #[error("unknown transfer: {0}")]
    InvalidTransfer(String),

    #[error("duplicate transfer id: {0}")]
    DuplicateTransfer(String),

    #[error("checksum mismatch for transfer {0}")]
    ChecksumMismatch(String),

    #[error("processing failed for transfer {id}: {reason}")]
    ProcessingFailed { id: String, reason: String },

    #[error("transfer expired: {0}")]
    Expired(String),
}

impl TransferError {
    /// Wire classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OversizedFile { .. } | Self::BufferLimitExceeded { .. } => {
                ErrorKind::OversizedFile
            }
            Self::InvalidTransfer(_) => ErrorKind::InvalidTransfer,
            Self::ChecksumMismatch(_) => ErrorKind::ChecksumMismatch,
            Self::DuplicateTransfer(_) | Self::ProcessingFailed { .. } => {
                ErrorKind::ProcessingFailed
            }
            Self::Expired(_) => ErrorKind::TransferExpired,
        }
    }

    /// Human-readable text sent to the offending connection.
    pub fn client_message(&self) -> String {
        match self {
            Self::OversizedFile { limit, .. } | Self::BufferLimitExceeded { limit, .. } => {
                if *limit < MIB {
                    format!("File size exceeds {limit} byte limit")
                } else {
                    format!("File size exceeds {} MB limit", limit / MIB)
                }
            }
            Self::InvalidTransfer(_) => "Invalid file transfer".into(),
            Self::ChecksumMismatch(_) => "Chunk checksum mismatch".into(),
            Self::DuplicateTransfer(_) | Self::ProcessingFailed { .. } => {
                "Chunk processing failed".into()
            }
            Self::Expired(_) => "File transfer expired".into(),
        }
    }

    /// Transfer id the error refers to, when one exists.
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            Self::BufferLimitExceeded { id, .. } | Self::ProcessingFailed { id, .. } => {
                Some(id.as_str())
            }
            Self::InvalidTransfer(id)
            | Self::DuplicateTransfer(id)
            | Self::ChecksumMismatch(id)
            | Self::Expired(id) => Some(id.as_str()),
            Self::OversizedFile { .. } => None,
        }
    }
}
