use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::TransferError;
use crate::types::{ConnectionId, ExpiredTransfer, Transfer, TransferId, TransferMeta};

/// Shared handle to one table entry.
///
/// The entry mutex serializes every append to a single transfer; the table
/// mutex only guards the map itself and is never held while an entry lock
/// is awaited.
pub type TransferEntry = Arc<Mutex<Transfer>>;

/// Process-wide store of open transfers, keyed by transfer id.
///
/// No persistence; entries live until completion, idle expiry, or owner
/// disconnect.
#[derive(Default)]
pub struct TransferTable {
    entries: Mutex<HashMap<TransferId, Slot>>,
}

/// Owner is kept next to the entry so owner lookups never wait on a
/// transfer that is busy appending.
struct Slot {
    owner: ConnectionId,
    entry: TransferEntry,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new open transfer with no chunks.
    pub async fn allocate(
        &self,
        id: TransferId,
        owner: &str,
        meta: TransferMeta,
    ) -> Result<TransferEntry, TransferError> {
        let mut entries = self.entries.lock().await;
        match entries.entry(id) {
            Entry::Occupied(e) => Err(TransferError::DuplicateTransfer(e.key().clone())),
            Entry::Vacant(e) => {
                let transfer = Transfer::new(e.key().clone(), owner.to_string(), meta);
                let entry = Arc::new(Mutex::new(transfer));
                e.insert(Slot {
                    owner: owner.to_string(),
                    entry: Arc::clone(&entry),
                });
                Ok(entry)
            }
        }
    }

    /// Looks up an open transfer. Absence is a normal outcome.
    pub async fn get(&self, id: &str) -> Option<TransferEntry> {
        self.entries
            .lock()
            .await
            .get(id)
            .map(|slot| Arc::clone(&slot.entry))
    }

    /// Removes an entry. Removing an absent id is a no-op.
    ///
    /// Does not touch the entry lock, so it is safe to call while holding
    /// it; the caller is responsible for closing the returned transfer.
    pub async fn remove(&self, id: &str) -> Option<TransferEntry> {
        self.entries.lock().await.remove(id).map(|slot| slot.entry)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Evicts transfers idle for longer than `ttl` as of `now`.
    ///
    /// Entries whose lock is currently held are mid-append and therefore not
    /// idle; they are skipped rather than waited on.
    pub async fn remove_expired(&self, ttl: Duration, now: Instant) -> Vec<ExpiredTransfer> {
        let mut entries = self.entries.lock().await;
        let mut expired = Vec::new();

        entries.retain(|_, slot| {
            let Ok(mut transfer) = slot.entry.try_lock() else {
                return true;
            };
            if transfer.idle_for(now) <= ttl {
                return true;
            }
            transfer.close();
            expired.push(ExpiredTransfer {
                id: transfer.id().to_string(),
                owner: transfer.owner().to_string(),
                meta: transfer.meta().clone(),
                received_bytes: transfer.received_bytes(),
            });
            false
        });

        expired
    }

    /// Evicts every transfer started by `owner`.
    pub async fn remove_owned_by(&self, owner: &str) -> Vec<TransferId> {
        let removed: Vec<(TransferId, TransferEntry)> = {
            let mut entries = self.entries.lock().await;
            let ids: Vec<TransferId> = entries
                .iter()
                .filter(|(_, slot)| slot.owner == owner)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|slot| (id, slot.entry)))
                .collect()
        };

        // Table lock released: waiting on a busy entry cannot deadlock with
        // an appender that needs the table to finish.
        let mut ids = Vec::with_capacity(removed.len());
        for (id, entry) in removed {
            entry.lock().await.close();
            ids.push(id);
        }
        ids
    }
}
