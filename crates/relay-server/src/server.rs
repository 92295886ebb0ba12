//! Relay WebSocket server.
//!
//! Listens on a TCP port, upgrades every incoming connection to WebSocket,
//! and hands each one its own read/write pumps.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use hackchat_protocol::constants::{DEFAULT_PORT, WS_MAX_MESSAGE_SIZE};

use crate::ServerError;
use crate::connection::{self, ClientConnection, ClientMeta};
use crate::handler::Handler;
use crate::rooms::RoomRegistry;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Largest accepted WebSocket message or frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

/// The relay WebSocket server.
///
/// Accepts any number of clients, registers each with the shared
/// [`RoomRegistry`], and dispatches their events to the [`Handler`].
pub struct RelayServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    rooms: Arc<RoomRegistry>,
    connections: Mutex<HashMap<String, ClientConnection>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> RelayServer<H> {
    /// Creates a new server.
    ///
    /// `rooms` is shared with the caller so the handler can fan messages
    /// out to the same registry the server registers connections in.
    pub fn new(config: ServerConfig, handler: Arc<H>, rooms: Arc<RoomRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler,
            rooms,
            connections: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Number of connections whose pumps are still running.
    pub async fn active_connections(&self) -> usize {
        self.connections
            .lock()
            .await
            .values()
            .filter(|c| c.sender().is_connected())
            .count()
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    ///
    /// On shutdown every open connection is closed and its disconnect hook
    /// has run before this returns.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("relay server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    self.close_all().await;
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn close_all(&self) {
        let conns: Vec<ClientConnection> = {
            let mut lock = self.connections.lock().await;
            lock.drain().map(|(_, c)| c).collect()
        };
        for conn in conns {
            conn.close_and_wait().await;
        }
    }

    /// Handles a single TCP connection: upgrades to WS and starts its pumps.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let max = self.config.max_message_size;
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(max);
        ws_config.max_frame_size = Some(max);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

        let meta = ClientMeta {
            id: uuid::Uuid::new_v4().simple().to_string(),
            remote_addr: peer_addr.to_string(),
        };
        tracing::info!(%peer_addr, conn = %meta.id, "WebSocket connection established");

        let conn = connection::spawn_connection(
            ws_stream,
            meta,
            Arc::clone(&self.handler),
            Arc::clone(&self.rooms),
            max,
            self.cancel.clone(),
        );

        let mut conns = self.connections.lock().await;
        conns.retain(|_, c| c.sender().is_connected());
        conns.insert(conn.meta.id.clone(), conn);
        Ok(())
    }
}
