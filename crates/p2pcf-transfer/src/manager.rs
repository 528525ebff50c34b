//! Per-transfer locking
//!
//! The map lock is held only for lookup/insert and never while waiting on a
//! tracker; all tracker work happens under the tracker's own lock, so
//! distinct transfers never contend.

use p2pcf_core::message::FileMetadataMessage;
use p2pcf_core::{P2pError, P2pResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::chunker::{check_limits, FileChunker};
use crate::store::ChunkStore;
use crate::tracker::TransferTracker;

pub type SharedTracker = Arc<Mutex<TransferTracker>>;

pub struct TransferManager {
    store: ChunkStore,
    max_chunk_size: usize,
    max_total_chunks: u32,
    /// Each entry keeps the tracker's chunk count so lookups can check it
    /// without locking the tracker.
    trackers: Mutex<HashMap<String, (u32, SharedTracker)>>,
}

impl TransferManager {
    pub fn open(work_dir: &Path, max_chunk_size: usize, max_total_chunks: u32) -> P2pResult<Self> {
        Ok(Self {
            store: ChunkStore::open(work_dir)?,
            max_chunk_size,
            max_total_chunks,
            trackers: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Send-side chunker over the same work directory.
    pub fn chunker(&self) -> FileChunker {
        FileChunker::new(self.store.clone(), self.max_chunk_size)
    }

    /// Reject incoming metadata whose chunk size or chunk count exceeds
    /// this manager's limits.
    pub fn check_incoming(&self, msg: &FileMetadataMessage) -> P2pResult<()> {
        check_limits(msg, self.max_chunk_size, self.max_total_chunks)
    }

    /// The tracker for `file_id`, opened (and resumed from disk) on first use.
    pub fn tracker(&self, file_id: &str, total_chunks: u32) -> P2pResult<SharedTracker> {
        let mut trackers = self.trackers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((existing_total, existing)) = trackers.get(file_id) {
            if *existing_total != total_chunks {
                return Err(P2pError::validation(format!(
                    "transfer {file_id} has {existing_total} chunks, not {total_chunks}"
                )));
            }
            return Ok(Arc::clone(existing));
        }

        if total_chunks > self.max_total_chunks {
            return Err(P2pError::validation(format!(
                "transfer {file_id} has {total_chunks} chunks, limit is {}",
                self.max_total_chunks
            )));
        }
        let tracker = TransferTracker::open(self.store.clone(), file_id, total_chunks)?;
        let shared = Arc::new(Mutex::new(tracker));
        trackers.insert(file_id.to_string(), (total_chunks, Arc::clone(&shared)));
        Ok(shared)
    }

    /// An already-open tracker, if any.
    pub fn get(&self, file_id: &str) -> Option<SharedTracker> {
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(file_id)
            .map(|(_, tracker)| Arc::clone(tracker))
    }

    /// Run `f` with exclusive access to the tracker for `file_id`.
    pub fn with_tracker<T>(
        &self,
        file_id: &str,
        total_chunks: u32,
        f: impl FnOnce(&mut TransferTracker) -> P2pResult<T>,
    ) -> P2pResult<T> {
        let shared = self.tracker(file_id, total_chunks)?;
        let mut tracker = shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tracker)
    }

    /// Forget a transfer (after assembly or abandonment). Files on disk are
    /// left to the caller.
    pub fn remove(&self, file_id: &str) -> Option<SharedTracker> {
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(file_id)
            .map(|(_, tracker)| tracker)
    }

    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
