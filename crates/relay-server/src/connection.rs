//! Client connection management: read/write pumps, ping/pong, send buffering.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hackchat_protocol::constants::{WS_PING_PERIOD, WS_PONG_WAIT};
use hackchat_protocol::{ErrorKind, EventType, Message};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::binary::parse_binary_chunk;
use crate::handler::Handler;
use crate::rooms::RoomRegistry;

/// Metadata about a connected client.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub id: String,
    pub remote_addr: String,
}

/// Handle for sending messages to one client.
///
/// Cloneable and cheap: wraps an `mpsc::Sender` plus the connection id.
#[derive(Clone)]
pub struct Sender {
    id: Arc<str>,
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Wraps the outbound channel of the connection `id`.
    pub fn new(id: &str, tx: mpsc::Sender<WsMessage>) -> Self {
        Self { id: id.into(), tx }
    }

    /// Identity of the connection this sender writes to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` only if the buffer is full or the client disconnected.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.send_text(json.into())
    }

    /// Sends pre-serialized JSON text.
    ///
    /// `Utf8Bytes` clones share one buffer, so a room broadcast serializes
    /// once and hands every member the same bytes.
    pub fn send_text(&self, text: Utf8Bytes) -> Result<(), SendError> {
        self.tx.try_send(WsMessage::Text(text)).map_err(|_| {
            tracing::warn!(conn = %self.id, "send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends a generic error response for the given request message.
    pub fn send_error(&self, req: &Message, kind: ErrorKind, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(kind, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to a client.
///
/// Owns the read/write pump tasks and provides a [`Sender`] for
/// asynchronous message delivery.
pub struct ClientConnection {
    pub meta: ClientMeta,
    sender: Sender,
    cancel: CancellationToken,
    done: tokio::sync::watch::Receiver<bool>,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Signals shutdown and waits until the disconnect hook has run.
    pub async fn close_and_wait(mut self) {
        self.cancel.cancel();
        let _ = self.done.wait_for(|finished| *finished).await;
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The connection is registered with `rooms` before the pumps start and
/// unregistered (then `handler.on_disconnected` is called) when the read
/// pump exits.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    meta: ClientMeta,
    handler: Arc<H>,
    rooms: Arc<RoomRegistry>,
    max_message_size: usize,
    server_cancel: CancellationToken,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender::new(&meta.id, tx);
    let (done_tx, done_rx) = tokio::sync::watch::channel(false);

    let conn = ClientConnection {
        meta: meta.clone(),
        sender: sender.clone(),
        cancel: cancel.clone(),
        done: done_rx,
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    // Write pump.
    tokio::spawn(write_pump(ws_sink, rx, cancel.clone(), WS_PING_PERIOD));

    // Read pump.
    let read_cancel = cancel.clone();
    tokio::spawn(async move {
        rooms.register(sender.clone()).await;

        read_pump(
            ws_stream,
            sender.clone(),
            Arc::clone(&handler),
            max_message_size,
            read_cancel.clone(),
        )
        .await;

        // When read pump exits, cancel the write pump too.
        read_cancel.cancel();
        rooms.unregister(sender.id()).await;
        handler.on_disconnected(sender).await;
        tracing::info!(conn = %meta.id, addr = %meta.remote_addr, "client disconnected");
        let _ = done_tx.send(true);
    });

    conn
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<WsMessage>,
    cancel: CancellationToken,
    ping_period: Duration,
) where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(ping_period);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Channel closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches to the handler.
///
/// Frames are dispatched one at a time, so a client's chunks reach the
/// handler in the order they arrived on the socket.
async fn read_pump<S, H>(
    mut stream: S,
    sender: Sender,
    handler: Arc<H>,
    max_message_size: usize,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut got_pong = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !got_pong {
                    tracing::warn!(conn = %sender.id(), "pong timeout, closing connection");
                    break;
                }
                got_pong = false;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > max_message_size {
                                    tracing::error!("message exceeds max size ({} > {max_message_size})", text.len());
                                    continue;
                                }
                                dispatch_text(&handler, &sender, &text).await;
                            }
                            WsMessage::Binary(data) => {
                                if data.len() > max_message_size {
                                    tracing::error!("binary message exceeds max size ({} > {max_message_size})", data.len());
                                    continue;
                                }
                                dispatch_binary(&handler, &sender, &data).await;
                            }
                            WsMessage::Pong(_) => {
                                got_pong = true;
                                pong_deadline.reset();
                            }
                            WsMessage::Ping(data) => {
                                // Auto-respond to client pings.
                                let _ = sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Close(_) => {
                                tracing::debug!(conn = %sender.id(), "received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {} // Raw frames ignored.
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(conn = %sender.id(), "read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }
}

/// Dispatches a text (JSON) message to the appropriate handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(conn = %sender.id(), "invalid message JSON: {e}");
            let _ = sender.send_msg(Message::error("", ErrorKind::BadRequest, "invalid JSON"));
            return;
        }
    };

    let s = sender.clone();
    match msg.msg_type {
        EventType::JoinRoom => handler.on_join_room(s, msg).await,
        EventType::ChatMessage => handler.on_chat_message(s, msg).await,
        EventType::StartFileTransfer => handler.on_start_file_transfer(s, msg).await,
        EventType::FileChunk => handler.on_file_chunk(s, msg).await,
        // Server-to-client events and unknown names are not requests.
        _ => {
            tracing::warn!(conn = %sender.id(), msg_type = ?msg.msg_type, "unexpected event type");
            let _ = sender.send_error(&msg, ErrorKind::BadRequest, "unknown message type");
        }
    }
}

/// Dispatches a binary WebSocket frame as a file chunk.
async fn dispatch_binary<H: Handler>(handler: &Arc<H>, sender: &Sender, data: &[u8]) {
    match parse_binary_chunk(data) {
        Ok((header, chunk)) => {
            handler.on_binary_chunk(sender.clone(), header, chunk).await;
        }
        Err(e) => {
            tracing::warn!(conn = %sender.id(), "failed to parse binary message: {e}");
            let _ = sender.send_msg(Message::error("", ErrorKind::BadRequest, e.to_string()));
        }
    }
}
