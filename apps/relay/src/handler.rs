//! Relay event handling: rooms, chat, and chunked file transfers.

use std::sync::Arc;

use hackchat_protocol::constants::SYSTEM_USER;
use hackchat_protocol::{
    ChatMessageRequest, ErrorKind, EventType, FileChunkRequest, FileMessage, FileTransferReady,
    JoinRoomRequest, Message, StartFileTransferRequest, TextMessage,
};
use hackchat_relay_server::{BinaryChunkHeader, Handler, HandlerFuture, RoomRegistry, Sender};
use hackchat_transfer::{ChunkOutcome, TransferError, TransferManager};

/// Wires client events to the room registry and the transfer manager.
pub struct RelayHandler {
    rooms: Arc<RoomRegistry>,
    transfers: Arc<TransferManager>,
    purge_on_disconnect: bool,
}

impl RelayHandler {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        transfers: Arc<TransferManager>,
        purge_on_disconnect: bool,
    ) -> Self {
        Self {
            rooms,
            transfers,
            purge_on_disconnect,
        }
    }

    /// Appends one chunk and answers the sender.
    ///
    /// On the last chunk the file message reaches the room before the
    /// sender sees its final acknowledgement.
    async fn handle_chunk(&self, sender: &Sender, id: &str, req: FileChunkRequest) {
        let transfer_id = req.transfer_id.clone();
        let ack = match self.transfers.append_chunk(req).await {
            Ok(ChunkOutcome::Stored(ack)) => ack,
            Ok(ChunkOutcome::Completed { ack, room, file }) => {
                let encoded = encode_file_message(file).await;
                if !self.deliver_file(sender, id, &transfer_id, &room, encoded).await {
                    return;
                }
                ack
            }
            Err(e) => {
                tracing::warn!(conn = %sender.id(), %transfer_id, "chunk rejected: {e}");
                send_transfer_error(sender, id, &e);
                return;
            }
        };

        match Message::new(id, EventType::ChunkReceived, Some(&ack)) {
            Ok(reply) => {
                let _ = sender.send_msg(reply);
            }
            Err(e) => tracing::error!(%transfer_id, "failed to encode ack: {e}"),
        }
    }

    /// Fans an encoded file message out to `room` and settles the transfer.
    ///
    /// If encoding failed the transfer's last chunk is rolled back and the
    /// sender gets `processing_failed`, so it can resend that chunk. Returns
    /// whether the file was delivered.
    async fn deliver_file(
        &self,
        sender: &Sender,
        id: &str,
        transfer_id: &str,
        room: &str,
        encoded: anyhow::Result<String>,
    ) -> bool {
        let json = match encoded {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(transfer_id, "file broadcast failed: {e}");
                self.transfers.rollback(transfer_id).await;
                let err = TransferError::ProcessingFailed {
                    id: transfer_id.to_string(),
                    reason: e.to_string(),
                };
                send_transfer_error(sender, id, &err);
                return false;
            }
        };

        let delivered = self.rooms.emit_json_to_room(room, json).await;
        tracing::debug!(room, delivered, "file message broadcast");
        self.transfers.finish(transfer_id).await;
        true
    }
}

/// Base64-encodes and serializes the file off the async runtime.
///
/// A panic in the encoding task is reported as an error.
async fn encode_file_message(file: FileMessage) -> anyhow::Result<String> {
    let json = tokio::task::spawn_blocking(move || {
        let msg = Message::event(EventType::FileMessage, &file)?;
        serde_json::to_string(&msg)
    })
    .await??;
    Ok(json)
}

fn send_transfer_error(sender: &Sender, id: &str, err: &TransferError) {
    let _ = sender.send_msg(Message::transfer_error(
        id,
        err.kind(),
        err.client_message(),
        err.transfer_id(),
    ));
}

fn send_bad_payload(sender: &Sender, msg: &Message, e: impl std::fmt::Display) {
    tracing::warn!(conn = %sender.id(), msg_type = ?msg.msg_type, "bad payload: {e}");
    let _ = sender.send_error(msg, ErrorKind::BadRequest, &e.to_string());
}

impl Handler for RelayHandler {
    fn on_join_room(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: JoinRoomRequest = match msg.require_payload() {
                Ok(r) => r,
                Err(e) => return send_bad_payload(&sender, &msg, e),
            };

            self.rooms.join(sender.id(), &req.room).await;
            tracing::info!(conn = %sender.id(), room = %req.room, user = %req.user_name, "joined room");

            let notice = TextMessage {
                user: SYSTEM_USER.into(),
                text: format!("{} has joined the room.", req.user_name),
            };
            match Message::event(EventType::Message, &notice) {
                Ok(event) => {
                    self.rooms
                        .emit_to_room_except(&req.room, sender.id(), &event)
                        .await;
                }
                Err(e) => tracing::error!("failed to encode join notice: {e}"),
            }
        })
    }

    fn on_chat_message(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: ChatMessageRequest = match msg.require_payload() {
                Ok(r) => r,
                Err(e) => return send_bad_payload(&sender, &msg, e),
            };

            let line = TextMessage {
                user: req.user_name,
                text: req.message,
            };
            match Message::event(EventType::Message, &line) {
                Ok(event) => {
                    self.rooms.emit_to_room(&req.room, &event).await;
                }
                Err(e) => tracing::error!("failed to encode chat message: {e}"),
            }
        })
    }

    fn on_start_file_transfer(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: StartFileTransferRequest = match msg.require_payload() {
                Ok(r) => r,
                Err(e) => return send_bad_payload(&sender, &msg, e),
            };

            match self.transfers.start_transfer(sender.id(), req).await {
                Ok(transfer_id) => {
                    let ready = FileTransferReady { transfer_id };
                    if let Ok(reply) = msg.reply(EventType::FileTransferReady, Some(&ready)) {
                        let _ = sender.send_msg(reply);
                    }
                }
                Err(e) => send_transfer_error(&sender, &msg.id, &e),
            }
        })
    }

    fn on_file_chunk(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: FileChunkRequest = match msg.require_payload() {
                Ok(r) => r,
                Err(e) => return send_bad_payload(&sender, &msg, e),
            };
            self.handle_chunk(&sender, &msg.id, req).await;
        })
    }

    fn on_binary_chunk(
        &self,
        sender: Sender,
        header: BinaryChunkHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            let id = header.id.clone();
            self.handle_chunk(&sender, &id, header.into_request(data)).await;
        })
    }

    fn on_disconnected(&self, sender: Sender) -> HandlerFuture<'_> {
        Box::pin(async move {
            if self.purge_on_disconnect {
                self.transfers.release_connection(sender.id()).await;
            }
        })
    }
}
