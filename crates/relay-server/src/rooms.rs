//! Connection registry and room fan-out.
//!
//! Tracks which connections are live and which rooms each one joined, and
//! delivers a message to a single connection or to every member of a room.

use std::collections::{HashMap, HashSet};

use hackchat_protocol::Message;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::connection::{SendError, Sender};

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<String, Sender>,
    /// room -> member connection ids
    rooms: HashMap<String, HashSet<String>>,
    /// connection id -> joined rooms
    memberships: HashMap<String, HashSet<String>>,
}

/// Live connections and their room memberships.
#[derive(Default)]
pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a live connection.
    pub async fn register(&self, sender: Sender) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(sender.id().to_string(), sender);
    }

    /// Removes a connection and drops it from every room it joined.
    pub async fn unregister(&self, conn_id: &str) {
        let mut inner = self.inner.write().await;
        inner.connections.remove(conn_id);
        let Some(joined) = inner.memberships.remove(conn_id) else {
            return;
        };
        for room in joined {
            if let Some(members) = inner.rooms.get_mut(&room) {
                members.remove(conn_id);
                if members.is_empty() {
                    inner.rooms.remove(&room);
                }
            }
        }
    }

    /// Adds a connection to a room. Joining twice is a no-op.
    ///
    /// Returns `false` if the connection is not registered.
    pub async fn join(&self, conn_id: &str, room: &str) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(conn_id) {
            return false;
        }
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id.to_string());
        inner
            .memberships
            .entry(conn_id.to_string())
            .or_default()
            .insert(room.to_string());
        true
    }

    pub async fn is_connected(&self, conn_id: &str) -> bool {
        self.inner.read().await.connections.contains_key(conn_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Connection ids currently in `room`.
    pub async fn members(&self, room: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sends a message to one connection.
    pub async fn emit_to(&self, conn_id: &str, msg: Message) -> Result<(), SendError> {
        let sender = self
            .inner
            .read()
            .await
            .connections
            .get(conn_id)
            .cloned()
            .ok_or(SendError)?;
        sender.send_msg(msg)
    }

    /// Sends a message to every member of `room`, including the sender.
    ///
    /// Returns the number of members the message was queued for.
    pub async fn emit_to_room(&self, room: &str, msg: &Message) -> usize {
        self.fan_out(room, None, msg).await
    }

    /// Sends a message to every member of `room` except `except`.
    pub async fn emit_to_room_except(&self, room: &str, except: &str, msg: &Message) -> usize {
        self.fan_out(room, Some(except), msg).await
    }

    async fn fan_out(&self, room: &str, except: Option<&str>, msg: &Message) -> usize {
        let text: Utf8Bytes = match serde_json::to_string(msg) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(room, "failed to serialize broadcast: {e}");
                return 0;
            }
        };
        self.fan_out_text(room, except, text).await
    }

    /// Sends an already-serialized envelope to every member of `room`.
    ///
    /// Used for large payloads that were serialized off the async runtime.
    pub async fn emit_json_to_room(&self, room: &str, json: String) -> usize {
        self.fan_out_text(room, None, json.into()).await
    }

    async fn fan_out_text(&self, room: &str, except: Option<&str>, text: Utf8Bytes) -> usize {
        let targets: Vec<Sender> = {
            let inner = self.inner.read().await;
            let Some(members) = inner.rooms.get(room) else {
                return 0;
            };
            members
                .iter()
                .filter(|id| Some(id.as_str()) != except)
                .filter_map(|id| inner.connections.get(id).cloned())
                .collect()
        };

        targets
            .iter()
            .filter(|s| s.send_text(text.clone()).is_ok())
            .count()
    }
}
