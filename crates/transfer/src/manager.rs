//! Transfer lifecycle: start, append, reassemble, hand off.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hackchat_protocol::constants::MAX_FILE_SIZE;
use hackchat_protocol::{ChunkReceived, FileChunkRequest, FileMessage, StartFileTransferRequest};

use crate::TransferError;
use crate::chunked::{reassemble, verify_checksum};
use crate::table::TransferTable;
use crate::types::{ExpiredTransfer, TransferId, TransferMeta};

/// Limits applied by the [`TransferManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Cap on both the declared size and the bytes buffered per transfer.
    pub max_file_size: u64,
    /// Idle time after which an open transfer is evicted.
    pub transfer_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            transfer_ttl: Duration::from_secs(600),
        }
    }
}

/// Result of a successfully appended chunk.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Chunk buffered; the transfer stays open.
    Stored(ChunkReceived),
    /// Last chunk reassembled. The transfer stays in the table, refusing
    /// further chunks, until [`TransferManager::finish`] or
    /// [`TransferManager::rollback`] settles it.
    ///
    /// The file message must be delivered to `room` before `ack` is sent to
    /// the initiator.
    Completed {
        ack: ChunkReceived,
        room: String,
        file: FileMessage,
    },
}

impl ChunkOutcome {
    pub fn ack(&self) -> &ChunkReceived {
        match self {
            Self::Stored(ack) | Self::Completed { ack, .. } => ack,
        }
    }
}

/// Owns the transfer table and drives every transfer through its lifecycle.
///
/// Constructed once at startup and shared by reference; there is no global
/// table.
pub struct TransferManager {
    table: TransferTable,
    config: ManagerConfig,
    seq: AtomicU64,
}

impl TransferManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            table: TransferTable::new(),
            config,
            seq: AtomicU64::new(0),
        }
    }

    pub fn table(&self) -> &TransferTable {
        &self.table
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Validates a start request and allocates a transfer for `owner`.
    ///
    /// Oversized requests are rejected before any state is allocated.
    pub async fn start_transfer(
        &self,
        owner: &str,
        req: StartFileTransferRequest,
    ) -> Result<TransferId, TransferError> {
        if req.file_size > self.config.max_file_size {
            tracing::warn!(
                owner,
                file_name = %req.file_name,
                file_size = req.file_size,
                "rejecting oversized transfer"
            );
            return Err(TransferError::OversizedFile {
                size: req.file_size,
                limit: self.config.max_file_size,
            });
        }

        let id = self.next_transfer_id(owner);
        let meta = TransferMeta {
            room: req.room,
            user_name: req.user_name,
            file_name: req.file_name,
            file_type: req.file_type,
            file_size: req.file_size,
        };
        self.table.allocate(id.clone(), owner, meta).await?;

        tracing::info!(transfer_id = %id, owner, "transfer allocated");
        Ok(id)
    }

    /// Appends a chunk to an open transfer, reassembling it on the last chunk.
    ///
    /// On any error the transfer is left exactly as it was before this call.
    pub async fn append_chunk(&self, req: FileChunkRequest) -> Result<ChunkOutcome, TransferError> {
        let FileChunkRequest {
            transfer_id,
            chunk,
            chunk_index,
            is_last_chunk,
            checksum,
        } = req;

        let Some(entry) = self.table.get(&transfer_id).await else {
            return Err(TransferError::InvalidTransfer(transfer_id));
        };
        let mut transfer = entry.lock().await;
        if !transfer.accepts_chunks() {
            return Err(TransferError::InvalidTransfer(transfer_id));
        }

        if !verify_checksum(&chunk, &checksum) {
            return Err(TransferError::ChecksumMismatch(transfer_id));
        }

        let buffered = transfer.received_bytes().saturating_add(chunk.len() as u64);
        if buffered > self.config.max_file_size {
            return Err(TransferError::BufferLimitExceeded {
                id: transfer_id,
                buffered,
                limit: self.config.max_file_size,
            });
        }

        let ack = ChunkReceived {
            transfer_id: transfer_id.clone(),
            chunk_index,
        };

        if !is_last_chunk {
            transfer.push_chunk(chunk);
            tracing::trace!(%transfer_id, chunk_index, "chunk stored");
            return Ok(ChunkOutcome::Stored(ack));
        }

        let content = transfer.push_final(chunk, reassemble).map_err(|e| {
            tracing::error!(%transfer_id, "reassembly failed: {e}");
            TransferError::ProcessingFailed {
                id: transfer_id.clone(),
                reason: e.to_string(),
            }
        })?;

        let transfer_time = u64::try_from(transfer.elapsed().as_millis()).unwrap_or(u64::MAX);
        let meta = transfer.meta().clone();
        if transfer.received_bytes() != meta.file_size {
            tracing::warn!(
                %transfer_id,
                declared = meta.file_size,
                received = transfer.received_bytes(),
                "declared size does not match received bytes"
            );
        }
        tracing::debug!(
            %transfer_id,
            chunks = transfer.chunk_count(),
            bytes = content.len(),
            transfer_time,
            "transfer reassembled"
        );

        Ok(ChunkOutcome::Completed {
            ack,
            room: meta.room,
            file: FileMessage {
                user: meta.user_name,
                file_name: meta.file_name,
                file_size: meta.file_size,
                file_type: meta.file_type,
                file_content: content,
                transfer_time,
            },
        })
    }

    /// Removes a completed transfer once its file message was delivered.
    ///
    /// Returns `false` if the entry was already gone (expired or released).
    pub async fn finish(&self, id: &str) -> bool {
        let Some(entry) = self.table.remove(id).await else {
            return false;
        };
        let mut transfer = entry.lock().await;
        transfer.close();
        tracing::info!(
            transfer_id = id,
            room = %transfer.meta().room,
            bytes = transfer.received_bytes(),
            "transfer complete"
        );
        true
    }

    /// Reopens a completed transfer whose file message could not be
    /// delivered, dropping the last chunk so the client can resend it.
    ///
    /// Returns `false` if the entry is gone or was not completing.
    pub async fn rollback(&self, id: &str) -> bool {
        let Some(entry) = self.table.get(id).await else {
            return false;
        };
        let reopened = entry.lock().await.reopen();
        if reopened {
            tracing::warn!(transfer_id = id, "delivery failed, last chunk rolled back");
        }
        reopened
    }

    /// Evicts transfers idle for longer than the configured TTL.
    pub async fn expire_idle(&self) -> Vec<ExpiredTransfer> {
        self.expire_idle_at(Instant::now()).await
    }

    /// Like [`expire_idle`](Self::expire_idle) with an explicit clock.
    pub async fn expire_idle_at(&self, now: Instant) -> Vec<ExpiredTransfer> {
        let expired = self.table.remove_expired(self.config.transfer_ttl, now).await;
        for t in &expired {
            tracing::warn!(
                transfer_id = %t.id,
                owner = %t.owner,
                received = t.received_bytes,
                "transfer expired"
            );
        }
        expired
    }

    /// Drops every transfer started by a connection that went away.
    pub async fn release_connection(&self, owner: &str) -> Vec<TransferId> {
        let released = self.table.remove_owned_by(owner).await;
        if !released.is_empty() {
            tracing::info!(owner, count = released.len(), "released abandoned transfers");
        }
        released
    }

    /// Builds `<connection>-<unix millis>-<seq>`.
    ///
    /// The sequence suffix keeps two starts from one connection within the
    /// same millisecond distinct.
    fn next_transfer_id(&self, owner: &str) -> TransferId {
        let millis = chrono::Utc::now().timestamp_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{owner}-{millis}-{seq}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const MIB: u64 = 1024 * 1024;

    fn manager() -> TransferManager {
        TransferManager::new(ManagerConfig::default())
    }

    fn start_req(size: u64) -> StartFileTransferRequest {
        StartFileTransferRequest {
            room: "lobby".into(),
            user_name: "neo".into(),
            file_name: "notes.bin".into(),
            file_size: size,
            file_type: "application/octet-stream".into(),
        }
    }

    fn chunk(id: &str, data: &[u8], index: u64, last: bool) -> FileChunkRequest {
        FileChunkRequest {
            transfer_id: id.into(),
            chunk: data.to_vec(),
            chunk_index: index,
            is_last_chunk: last,
            checksum: String::new(),
        }
    }

    #[tokio::test]
    async fn three_chunks_reassemble_in_arrival_order() {
        let mgr = manager();
        let id = mgr.start_transfer("c1", start_req(30)).await.unwrap();

        let parts = [[b'a'; 10], [b'b'; 10], [b'c'; 10]];
        let mut acks = Vec::new();
        let mut file = None;
        for (i, part) in parts.iter().enumerate() {
            let last = i == parts.len() - 1;
            match mgr.append_chunk(chunk(&id, part, i as u64, last)).await.unwrap() {
                ChunkOutcome::Stored(ack) => acks.push(ack),
                ChunkOutcome::Completed { ack, room, file: f } => {
                    assert_eq!(room, "lobby");
                    acks.push(ack);
                    file = Some(f);
                }
            }
        }

        assert_eq!(acks.len(), 3);
        for (i, ack) in acks.iter().enumerate() {
            assert_eq!(ack.transfer_id, id);
            assert_eq!(ack.chunk_index, i as u64);
        }

        let file = file.expect("last chunk completes the transfer");
        let mut expected = Vec::new();
        expected.extend_from_slice(&[b'a'; 10]);
        expected.extend_from_slice(&[b'b'; 10]);
        expected.extend_from_slice(&[b'c'; 10]);
        assert_eq!(file.file_content, expected);
        assert_eq!(file.user, "neo");
        assert_eq!(file.file_name, "notes.bin");
        assert_eq!(file.file_size, 30);
        assert_eq!(file.file_type, "application/octet-stream");

        // Kept until delivery is settled.
        assert!(mgr.table().contains(&id).await);
        assert!(mgr.finish(&id).await);
        assert!(mgr.table().is_empty().await);
        assert!(!mgr.finish(&id).await);
    }

    #[tokio::test]
    async fn chunk_index_is_not_used_for_ordering() {
        let mgr = manager();
        let id = mgr.start_transfer("c1", start_req(6)).await.unwrap();

        mgr.append_chunk(chunk(&id, b"12", 7, false)).await.unwrap();
        mgr.append_chunk(chunk(&id, b"34", 0, false)).await.unwrap();
        let outcome = mgr.append_chunk(chunk(&id, b"56", 3, true)).await.unwrap();

        assert_eq!(outcome.ack().chunk_index, 3);
        match outcome {
            ChunkOutcome::Completed { file, .. } => assert_eq!(file.file_content, b"123456"),
            ChunkOutcome::Stored(_) => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn oversized_start_allocates_nothing() {
        let mgr = manager();
        let result = mgr.start_transfer("c1", start_req(200 * MIB)).await;
        match result {
            Err(e @ TransferError::OversizedFile { .. }) => {
                assert_eq!(e.client_message(), "File size exceeds 100 MB limit");
            }
            other => panic!("expected oversized error, got {other:?}"),
        }
        assert!(mgr.table().is_empty().await);
    }

    #[tokio::test]
    async fn exactly_max_size_is_accepted() {
        let mgr = manager();
        assert!(mgr.start_transfer("c1", start_req(100 * MIB)).await.is_ok());
        assert_eq!(mgr.table().len().await, 1);
    }

    #[tokio::test]
    async fn unknown_transfer_is_rejected_without_mutation() {
        let mgr = manager();
        let id = mgr.start_transfer("c1", start_req(4)).await.unwrap();

        let result = mgr.append_chunk(chunk("bogus", b"xx", 0, false)).await;
        assert!(matches!(result, Err(TransferError::InvalidTransfer(ref t)) if t == "bogus"));

        assert_eq!(mgr.table().len().await, 1);
        let entry = mgr.table().get(&id).await.unwrap();
        assert_eq!(entry.lock().await.chunk_count(), 0);
    }

    #[tokio::test]
    async fn chunk_after_completion_is_invalid() {
        let mgr = manager();
        let id = mgr.start_transfer("c1", start_req(2)).await.unwrap();
        mgr.append_chunk(chunk(&id, b"ok", 0, true)).await.unwrap();

        // Completing: present but refusing chunks.
        let again = mgr.append_chunk(chunk(&id, b"ok", 1, false)).await;
        assert!(matches!(again, Err(TransferError::InvalidTransfer(_))));

        mgr.finish(&id).await;
        let again = mgr.append_chunk(chunk(&id, b"ok", 1, true)).await;
        assert!(matches!(again, Err(TransferError::InvalidTransfer(_))));
        assert!(!mgr.rollback(&id).await);
    }

    #[tokio::test]
    async fn rollback_lets_last_chunk_be_resent() {
        let mgr = manager();
        let id = mgr.start_transfer("c1", start_req(6)).await.unwrap();
        mgr.append_chunk(chunk(&id, b"abc", 0, false)).await.unwrap();
        let first = mgr.append_chunk(chunk(&id, b"def", 1, true)).await.unwrap();
        assert!(matches!(first, ChunkOutcome::Completed { .. }));

        // Delivery failed.
        assert!(mgr.rollback(&id).await);
        {
            let entry = mgr.table().get(&id).await.unwrap();
            let t = entry.lock().await;
            assert_eq!(t.chunk_count(), 1);
            assert_eq!(t.received_bytes(), 3);
        }
        // Only one rollback per completion.
        assert!(!mgr.rollback(&id).await);

        let retry = mgr.append_chunk(chunk(&id, b"def", 1, true)).await.unwrap();
        match retry {
            ChunkOutcome::Completed { file, .. } => assert_eq!(file.file_content, b"abcdef"),
            ChunkOutcome::Stored(_) => panic!("expected completion"),
        }
        assert!(mgr.finish(&id).await);
        assert!(mgr.table().is_empty().await);
    }

    #[tokio::test]
    async fn released_while_completing_cannot_roll_back() {
        let mgr = manager();
        let id = mgr.start_transfer("c1", start_req(1)).await.unwrap();
        mgr.append_chunk(chunk(&id, b"x", 0, true)).await.unwrap();

        assert_eq!(mgr.release_connection("c1").await, vec![id.clone()]);
        assert!(!mgr.rollback(&id).await);
        assert!(!mgr.finish(&id).await);
    }

    #[tokio::test]
    async fn transfer_time_is_reported() {
        let mgr = manager();
        let id = mgr.start_transfer("c1", start_req(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let outcome = mgr.append_chunk(chunk(&id, b"x", 0, true)).await.unwrap();
        match outcome {
            ChunkOutcome::Completed { file, .. } => assert!(file.transfer_time >= 20),
            ChunkOutcome::Stored(_) => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn declared_size_is_reported_even_when_wrong() {
        let mgr = manager();
        let id = mgr.start_transfer("c1", start_req(999)).await.unwrap();
        let outcome = mgr.append_chunk(chunk(&id, b"abc", 0, true)).await.unwrap();
        match outcome {
            ChunkOutcome::Completed { file, .. } => {
                assert_eq!(file.file_size, 999);
                assert_eq!(file.file_content, b"abc");
            }
            ChunkOutcome::Stored(_) => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn buffered_bytes_over_cap_rejected_and_rolled_back() {
        let mgr = TransferManager::new(ManagerConfig {
            max_file_size: 8,
            ..ManagerConfig::default()
        });
        let id = mgr.start_transfer("c1", start_req(8)).await.unwrap();
        mgr.append_chunk(chunk(&id, b"12345", 0, false)).await.unwrap();

        let result = mgr.append_chunk(chunk(&id, b"6789", 1, false)).await;
        assert!(matches!(result, Err(TransferError::BufferLimitExceeded { buffered: 9, .. })));

        let entry = mgr.table().get(&id).await.unwrap();
        assert_eq!(entry.lock().await.received_bytes(), 5);

        // A smaller final chunk still completes.
        let outcome = mgr.append_chunk(chunk(&id, b"678", 1, true)).await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn checksum_mismatch_rejected() {
        let mgr = manager();
        let id = mgr.start_transfer("c1", start_req(4)).await.unwrap();
        let mut bad = chunk(&id, b"data", 0, true);
        bad.checksum = crate::checksum_bytes(b"other");

        let result = mgr.append_chunk(bad).await;
        assert!(matches!(result, Err(TransferError::ChecksumMismatch(_))));
        assert!(mgr.table().contains(&id).await);

        let mut good = chunk(&id, b"data", 0, true);
        good.checksum = crate::checksum_bytes(b"data");
        assert!(matches!(
            mgr.append_chunk(good).await.unwrap(),
            ChunkOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn transfers_are_isolated() {
        let mgr = manager();
        let a = mgr.start_transfer("c1", start_req(2)).await.unwrap();
        let b = mgr.start_transfer("c2", start_req(2)).await.unwrap();

        mgr.append_chunk(chunk(&a, b"A", 0, false)).await.unwrap();
        mgr.append_chunk(chunk(&b, b"B", 0, false)).await.unwrap();
        mgr.append_chunk(chunk(&a, b"a", 1, false)).await.unwrap();

        let outcome = mgr.append_chunk(chunk(&b, b"b", 1, true)).await.unwrap();
        match outcome {
            ChunkOutcome::Completed { file, .. } => assert_eq!(file.file_content, b"Bb"),
            ChunkOutcome::Stored(_) => panic!("expected completion"),
        }

        let entry = mgr.table().get(&a).await.unwrap();
        assert_eq!(entry.lock().await.chunks(), &[b"A".to_vec(), b"a".to_vec()]);
    }

    #[tokio::test]
    async fn ids_are_unique_per_connection() {
        let mgr = manager();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..50 {
            let id = mgr.start_transfer("c1", start_req(1)).await.unwrap();
            assert!(id.starts_with("c1-"));
            assert!(ids.insert(id));
        }
        assert_eq!(mgr.table().len().await, 50);
    }

    #[tokio::test]
    async fn expire_idle_evicts_and_invalidates() {
        let mgr = TransferManager::new(ManagerConfig {
            transfer_ttl: Duration::from_secs(10),
            ..ManagerConfig::default()
        });
        let id = mgr.start_transfer("c1", start_req(4)).await.unwrap();

        assert!(mgr.expire_idle().await.is_empty());

        let later = Instant::now() + Duration::from_secs(11);
        let expired = mgr.expire_idle_at(later).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
        assert_eq!(expired[0].owner, "c1");

        let result = mgr.append_chunk(chunk(&id, b"late", 0, true)).await;
        assert!(matches!(result, Err(TransferError::InvalidTransfer(_))));
    }

    #[tokio::test]
    async fn release_connection_drops_only_owned() {
        let mgr = manager();
        let mine = mgr.start_transfer("gone", start_req(1)).await.unwrap();
        let theirs = mgr.start_transfer("stays", start_req(1)).await.unwrap();

        let released = mgr.release_connection("gone").await;
        assert_eq!(released, vec![mine.clone()]);
        assert!(!mgr.table().contains(&mine).await);
        assert!(mgr.table().contains(&theirs).await);
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_transfer_are_serialized() {
        let mgr = Arc::new(manager());
        let id = mgr.start_transfer("c1", start_req(400)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..40u64 {
            let mgr = Arc::clone(&mgr);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                mgr.append_chunk(chunk(&id, &[i as u8; 10], i, false))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let entry = mgr.table().get(&id).await.unwrap();
        let t = entry.lock().await;
        assert_eq!(t.chunk_count(), 40);
        assert_eq!(t.received_bytes(), 400);
        // Every chunk stayed intact (no interleaving within a chunk).
        for c in t.chunks() {
            assert!(c.iter().all(|b| *b == c[0]));
        }
    }
}
