//! WebSocket room relay for HackChat.
//!
//! Accepts any number of client connections, tracks room membership in a
//! [`RoomRegistry`], dispatches JSON and binary frames to a [`Handler`]
//! trait, and manages each connection's lifecycle (ping/pong, graceful
//! shutdown).

mod binary;
mod connection;
mod handler;
mod rooms;
mod server;

pub use binary::{BinaryChunkHeader, ParseError, encode_binary_chunk, parse_binary_chunk};
pub use connection::{ClientConnection, ClientMeta, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use rooms::RoomRegistry;
pub use server::{RelayServer, ServerConfig};

/// Per-connection send buffer capacity.
///
/// A busy room fans every chat line and file message out to each member; a
/// member whose buffer fills up starts losing messages through `try_send()`.
pub const SEND_BUFFER_SIZE: usize = 1024;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
