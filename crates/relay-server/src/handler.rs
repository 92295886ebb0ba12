//! Handler trait for processing relay events.
//!
//! Implementors provide the chat and file-transfer semantics while the
//! server framework handles connections, rooms, routing, and the binary
//! chunk framing.

use std::future::Future;
use std::pin::Pin;

use hackchat_protocol::{ErrorKind, Message};

use crate::binary::BinaryChunkHeader;
use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling client events.
///
/// Each method receives the client's [`Sender`] (whose id identifies the
/// connection) and the parsed envelope. Default implementations reply
/// with `not_implemented` so handlers only override what they serve.
pub trait Handler: Send + Sync + 'static {
    /// Called for `join-room`.
    fn on_join_room(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ErrorKind::NotImplemented, "not implemented");
        })
    }

    /// Called for `chat-message`.
    fn on_chat_message(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ErrorKind::NotImplemented, "not implemented");
        })
    }

    /// Called for `start-file-transfer`.
    fn on_start_file_transfer(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ErrorKind::NotImplemented, "not implemented");
        })
    }

    /// Called for a JSON `file-chunk` (base64 chunk in the payload).
    fn on_file_chunk(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ErrorKind::NotImplemented, "not implemented");
        })
    }

    /// Called for a binary chunk frame.
    fn on_binary_chunk(
        &self,
        sender: Sender,
        header: BinaryChunkHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        let _ = data;
        Box::pin(async move {
            tracing::warn!("binary chunk received but handler not implemented");
            let _ = sender.send_msg(Message::error(
                header.id,
                ErrorKind::NotImplemented,
                "binary chunks not supported",
            ));
        })
    }

    /// Called after the client left every room (cleanup hook).
    fn on_disconnected(&self, sender: Sender) -> HandlerFuture<'_> {
        let _ = sender;
        Box::pin(async {})
    }
}
