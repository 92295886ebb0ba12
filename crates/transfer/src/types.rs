use std::time::{Duration, Instant};

use crate::chunked::ReassemblyError;

/// Identifier of an open transfer.
pub type TransferId = String;

/// Identifier of a client connection.
pub type ConnectionId = String;

/// Metadata supplied by the sender when a transfer starts.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferMeta {
    pub room: String,
    pub user_name: String,
    pub file_name: String,
    pub file_type: String,
    /// Declared size in bytes; reported verbatim on completion.
    pub file_size: u64,
}

/// One in-flight upload.
#[derive(Debug)]
pub struct Transfer {
    id: TransferId,
    owner: ConnectionId,
    meta: TransferMeta,
    /// Raw chunks in arrival order.
    chunks: Vec<Vec<u8>>,
    received_bytes: u64,
    started_at: Instant,
    last_activity: Instant,
    /// Set once the entry has left the table; late appenders holding the
    /// entry must treat it as unknown.
    closed: bool,
    /// Last chunk reassembled; waiting for the file to be delivered before
    /// the entry is finished or rolled back.
    completing: bool,
}

impl Transfer {
    /// Creates an open transfer with no chunks, started now.
    pub fn new(id: TransferId, owner: ConnectionId, meta: TransferMeta) -> Self {
        let now = Instant::now();
        Self {
            id,
            owner,
            meta,
            chunks: Vec::new(),
            received_bytes: 0,
            started_at: now,
            last_activity: now,
            closed: false,
            completing: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connection that started the transfer.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn meta(&self) -> &TransferMeta {
        &self.meta
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Bytes actually appended so far.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Time since allocation.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time since the last append (or allocation).
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reassembled and awaiting delivery.
    pub fn is_completing(&self) -> bool {
        self.completing
    }

    /// Whether another chunk may be appended.
    pub fn accepts_chunks(&self) -> bool {
        !self.closed && !self.completing
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    /// Appends a chunk at the end of the sequence.
    pub(crate) fn push_chunk(&mut self, data: Vec<u8>) {
        self.received_bytes += data.len() as u64;
        self.chunks.push(data);
        self.last_activity = Instant::now();
    }

    /// Rolls back the most recent append.
    pub(crate) fn pop_chunk(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.pop()?;
        self.received_bytes -= chunk.len() as u64;
        Some(chunk)
    }

    /// Appends the last chunk and reassembles the whole file with
    /// `reassembler`.
    ///
    /// On success the transfer stops accepting chunks until it is finished
    /// or rolled back. On failure the chunk is popped again, leaving the
    /// transfer as it was before the call.
    pub(crate) fn push_final<F>(
        &mut self,
        data: Vec<u8>,
        reassembler: F,
    ) -> Result<Vec<u8>, ReassemblyError>
    where
        F: FnOnce(&[Vec<u8>]) -> Result<Vec<u8>, ReassemblyError>,
    {
        self.push_chunk(data);
        match reassembler(&self.chunks) {
            Ok(content) => {
                self.completing = true;
                Ok(content)
            }
            Err(e) => {
                self.pop_chunk();
                Err(e)
            }
        }
    }

    /// Undoes a successful [`push_final`](Self::push_final) so the last
    /// chunk can be sent again.
    ///
    /// Returns `false` if the transfer was not completing.
    pub(crate) fn reopen(&mut self) -> bool {
        if self.closed || !self.completing {
            return false;
        }
        self.completing = false;
        self.pop_chunk();
        true
    }
}

/// A transfer evicted by the idle sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredTransfer {
    pub id: TransferId,
    pub owner: ConnectionId,
    pub meta: TransferMeta,
    pub received_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> TransferMeta {
        TransferMeta {
            room: "lobby".into(),
            user_name: "neo".into(),
            file_name: "notes.txt".into(),
            file_type: "text/plain".into(),
            file_size: 30,
        }
    }

    #[test]
    fn new_transfer_is_open_and_empty() {
        let t = Transfer::new("t1".into(), "c1".into(), sample_meta());
        assert_eq!(t.id(), "t1");
        assert_eq!(t.owner(), "c1");
        assert_eq!(t.chunk_count(), 0);
        assert_eq!(t.received_bytes(), 0);
        assert!(!t.is_closed());
    }

    #[test]
    fn push_and_pop_track_bytes() {
        let mut t = Transfer::new("t1".into(), "c1".into(), sample_meta());
        t.push_chunk(vec![0; 10]);
        t.push_chunk(vec![1; 4]);
        assert_eq!(t.received_bytes(), 14);
        assert_eq!(t.chunk_count(), 2);

        assert_eq!(t.pop_chunk(), Some(vec![1; 4]));
        assert_eq!(t.received_bytes(), 10);
        assert_eq!(t.chunk_count(), 1);
    }

    #[test]
    fn pop_on_empty_is_none() {
        let mut t = Transfer::new("t1".into(), "c1".into(), sample_meta());
        assert!(t.pop_chunk().is_none());
        assert_eq!(t.received_bytes(), 0);
    }

    #[test]
    fn failed_reassembly_restores_counters() {
        let mut t = Transfer::new("t1".into(), "c1".into(), sample_meta());
        t.push_chunk(b"head".to_vec());

        let result = t.push_final(b"tail".to_vec(), |chunks| {
            Err(ReassemblyError::Allocation(chunks.iter().map(Vec::len).sum()))
        });
        assert!(matches!(result, Err(ReassemblyError::Allocation(8))));
        assert_eq!(t.chunk_count(), 1);
        assert_eq!(t.received_bytes(), 4);
        assert!(t.accepts_chunks());

        // Sending the last chunk again completes.
        let content = t.push_final(b"tail".to_vec(), crate::chunked::reassemble).unwrap();
        assert_eq!(content, b"headtail");
        assert_eq!(t.chunk_count(), 2);
        assert!(t.is_completing());
        assert!(!t.accepts_chunks());
    }

    #[test]
    fn reopen_pops_the_final_chunk() {
        let mut t = Transfer::new("t1".into(), "c1".into(), sample_meta());
        assert!(!t.reopen());

        t.push_final(b"only".to_vec(), crate::chunked::reassemble).unwrap();
        assert!(t.reopen());
        assert_eq!(t.chunk_count(), 0);
        assert_eq!(t.received_bytes(), 0);
        assert!(t.accepts_chunks());

        // A closed transfer stays closed.
        t.push_final(b"only".to_vec(), crate::chunked::reassemble).unwrap();
        t.close();
        assert!(!t.reopen());
        assert!(!t.accepts_chunks());
    }

    #[test]
    fn idle_for_measures_from_last_activity() {
        let t = Transfer::new("t1".into(), "c1".into(), sample_meta());
        let later = Instant::now() + Duration::from_secs(30);
        assert!(t.idle_for(later) >= Duration::from_secs(30));
    }
}
