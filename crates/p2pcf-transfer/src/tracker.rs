//! Receive-side transfer state
//!
//! A tracker owns the received-set of one transfer. The set is mirrored in
//! `<fileId>.meta` and reloaded on `open`, so a transfer survives restarts.
//! Bits only go from unset to set; a transfer can be assembled exactly when
//! every bit is set.

use p2pcf_core::message::{FileChunkAckMessage, FileChunkMessage, FileChunkRequestMessage};
use p2pcf_core::{P2pError, P2pResult};
use p2pcf_crypto::{decrypt_chunk, verify_chunk_hash, FileKey};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

use crate::ranges::encode_ranges;
use crate::store::{tmp_path, validate_file_id, ChunkStore};

/// Result of accepting a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Newly stored and recorded as received.
    Stored,
    /// Already received; nothing was written.
    Duplicate,
}

#[derive(Debug)]
pub struct TransferTracker {
    store: ChunkStore,
    file_id: String,
    total_chunks: u32,
    received: Vec<bool>,
    received_count: usize,
}

impl TransferTracker {
    /// Open a transfer, restoring its received-set from disk if present.
    pub fn open(store: ChunkStore, file_id: &str, total_chunks: u32) -> P2pResult<Self> {
        validate_file_id(file_id)?;

        let mut received = vec![false; total_chunks as usize];
        let mut received_count = 0;
        if let Some(meta) = store.read_meta(file_id)? {
            for entry in meta.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let index: u32 = entry.parse().map_err(|_| {
                    P2pError::validation(format!("{file_id}.meta: bad entry {entry:?}"))
                })?;
                let slot = received.get_mut(index as usize).ok_or_else(|| {
                    P2pError::validation(format!(
                        "{file_id}.meta: index {index} out of range for {total_chunks} chunks"
                    ))
                })?;
                if !*slot {
                    *slot = true;
                    received_count += 1;
                }
            }
            tracing::debug!(file_id, received = received_count, total = total_chunks, "resumed transfer");
        }

        Ok(Self {
            store,
            file_id: file_id.to_string(),
            total_chunks,
            received,
            received_count,
        })
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn received_count(&self) -> usize {
        self.received_count
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_chunks as usize
    }

    pub fn is_received(&self, index: u32) -> bool {
        self.received.get(index as usize).copied().unwrap_or(false)
    }

    /// Verify and durably record one encrypted chunk blob.
    pub fn accept_chunk(
        &mut self,
        index: u32,
        blob: &[u8],
        expected_hash: Option<&str>,
    ) -> P2pResult<ChunkOutcome> {
        if index >= self.total_chunks {
            return Err(P2pError::validation(format!(
                "chunk index {index} out of range for {} chunks",
                self.total_chunks
            )));
        }
        if self.is_received(index) {
            tracing::debug!(file_id = %self.file_id, index, "duplicate chunk");
            return Ok(ChunkOutcome::Duplicate);
        }

        // Checked before anything touches disk, so a rejected chunk never
        // leaves a blob behind.
        if let Some(expected) = expected_hash {
            if !verify_chunk_hash(blob, expected) {
                tracing::warn!(file_id = %self.file_id, index, "chunk hash mismatch");
                return Err(P2pError::Integrity(format!(
                    "chunk {index} of {} does not match its hash",
                    self.file_id
                )));
            }
        }

        self.store.write_chunk(&self.file_id, index, blob)?;

        self.set_received(index, true);
        if let Err(e) = self.persist() {
            self.set_received(index, false);
            tracing::warn!(file_id = %self.file_id, index, error = %e, "received-set save failed, rolled back");
            if let Err(rm) = self.store.remove_chunk(&self.file_id, index) {
                tracing::warn!(file_id = %self.file_id, index, error = %rm, "could not remove unrecorded chunk");
            }
            return Err(P2pError::persistence(format!(
                "saving received-set for {}: {e}",
                self.file_id
            )));
        }

        tracing::debug!(
            file_id = %self.file_id,
            index,
            received = self.received_count,
            total = self.total_chunks,
            "chunk stored"
        );
        Ok(ChunkOutcome::Stored)
    }

    /// Accept a `file_chunk` message addressed to this transfer.
    pub fn accept_message(&mut self, msg: &FileChunkMessage) -> P2pResult<ChunkOutcome> {
        if msg.file_id != self.file_id {
            return Err(P2pError::validation(format!(
                "chunk for {} delivered to transfer {}",
                msg.file_id, self.file_id
            )));
        }
        if msg.total_chunks != self.total_chunks {
            return Err(P2pError::validation(format!(
                "chunk claims {} total chunks, transfer has {}",
                msg.total_chunks, self.total_chunks
            )));
        }
        if msg.encrypted_chunk_data.is_empty() {
            return Err(P2pError::validation("chunk message has no data"));
        }
        let blob = crate::b64_decode(&msg.encrypted_chunk_data)?;
        self.accept_chunk(msg.chunk_index, &blob, msg.chunk_hash.as_deref())
    }

    /// Sorted indices not yet received.
    pub fn missing_chunks(&self) -> Vec<u32> {
        self.indices_where(false)
    }

    /// Sorted indices received so far.
    pub fn received_chunks(&self) -> Vec<u32> {
        self.indices_where(true)
    }

    pub fn ack_message(&self) -> FileChunkAckMessage {
        FileChunkAckMessage {
            file_id: self.file_id.clone(),
            received: encode_ranges(&self.received_chunks()),
            total_chunks: self.total_chunks,
        }
    }

    pub fn request_message(&self) -> FileChunkRequestMessage {
        FileChunkRequestMessage {
            file_id: self.file_id.clone(),
            missing: encode_ranges(&self.missing_chunks()),
            total_chunks: self.total_chunks,
        }
    }

    /// Decrypt all chunks in order into `output`. Returns the bytes written.
    pub fn assemble_to(&self, output: &Path, file_key: &FileKey) -> P2pResult<u64> {
        self.assemble(output, file_key, None)
    }

    /// As [`assemble_to`](Self::assemble_to), additionally requiring the
    /// plaintext to hash to `expected_file_hash` (hex SHA-256).
    pub fn assemble_verified(
        &self,
        output: &Path,
        file_key: &FileKey,
        expected_file_hash: &str,
    ) -> P2pResult<u64> {
        self.assemble(output, file_key, Some(expected_file_hash))
    }

    fn assemble(&self, output: &Path, file_key: &FileKey, expected: Option<&str>) -> P2pResult<u64> {
        if !self.is_complete() {
            return Err(P2pError::IncompleteTransfer {
                received: self.received_count,
                total: self.total_chunks as usize,
            });
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = tmp_path(output);
        let result = self.write_plaintext(&tmp, file_key, expected);
        match result {
            Ok(bytes) => {
                if let Err(e) = std::fs::rename(&tmp, output) {
                    let _ = std::fs::remove_file(&tmp);
                    return Err(e.into());
                }
                tracing::info!(file_id = %self.file_id, path = %output.display(), bytes, "transfer assembled");
                Ok(bytes)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                tracing::warn!(file_id = %self.file_id, error = %e, "assembly failed, no output written");
                Err(e)
            }
        }
    }

    fn write_plaintext(&self, tmp: &Path, file_key: &FileKey, expected: Option<&str>) -> P2pResult<u64> {
        let mut out = std::io::BufWriter::new(std::fs::File::create(tmp)?);
        let mut hasher = Sha256::new();
        let mut written = 0u64;

        for index in 0..self.total_chunks {
            let blob = self.store.read_chunk(&self.file_id, index)?;
            let plaintext = decrypt_chunk(file_key, &blob).map_err(|e| match e {
                P2pError::Authentication(_) => P2pError::Integrity(format!(
                    "chunk {index} of {} failed to decrypt",
                    self.file_id
                )),
                other => other,
            })?;
            hasher.update(&plaintext);
            out.write_all(&plaintext)?;
            written += plaintext.len() as u64;
        }

        if let Some(expected) = expected {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(P2pError::Integrity(format!(
                    "assembled {} hashes to {actual}, expected {expected}",
                    self.file_id
                )));
            }
        }

        let file = out
            .into_inner()
            .map_err(|e| P2pError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(written)
    }

    /// Delete all stored chunks and the received-set.
    pub fn discard(self) -> P2pResult<()> {
        self.store.discard(&self.file_id, self.total_chunks)?;
        tracing::debug!(file_id = %self.file_id, "transfer discarded");
        Ok(())
    }

    fn set_received(&mut self, index: u32, value: bool) {
        if let Some(slot) = self.received.get_mut(index as usize) {
            if *slot != value {
                *slot = value;
                if value {
                    self.received_count += 1;
                } else {
                    self.received_count -= 1;
                }
            }
        }
    }

    fn persist(&self) -> P2pResult<()> {
        let line = self
            .received_chunks()
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.store.write_meta(&self.file_id, &line)
    }

    fn indices_where(&self, value: bool) -> Vec<u32> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == value)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2pcf_crypto::{chunk_hash, encrypt_chunk, generate_file_key};

    fn store(dir: &Path) -> ChunkStore {
        ChunkStore::open(dir).unwrap()
    }

    #[test]
    fn test_out_of_range_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = TransferTracker::open(store(dir.path()), "f", 3).unwrap();

        let err = t.accept_chunk(3, b"blob", None).unwrap_err();
        assert!(matches!(err, P2pError::Validation(_)));
        assert_eq!(t.received_count(), 0);
    }

    #[test]
    fn test_duplicate_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = TransferTracker::open(store(dir.path()), "f", 3).unwrap();

        assert_eq!(t.accept_chunk(1, b"first", None).unwrap(), ChunkOutcome::Stored);
        assert_eq!(t.accept_chunk(1, b"second", None).unwrap(), ChunkOutcome::Duplicate);
        assert_eq!(std::fs::read(dir.path().join("f.chunk.1")).unwrap(), b"first");
        assert_eq!(t.received_count(), 1);
    }

    #[test]
    fn test_hash_mismatch_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = TransferTracker::open(store(dir.path()), "f", 2).unwrap();

        let err = t
            .accept_chunk(0, b"payload", Some(&chunk_hash(b"other")))
            .unwrap_err();
        assert!(matches!(err, P2pError::Integrity(_)));
        assert!(!dir.path().join("f.chunk.0").exists());
        assert_eq!(t.missing_chunks(), vec![0, 1]);
        assert_eq!(store(dir.path()).read_meta("f").unwrap(), None);
    }

    #[test]
    fn test_hash_mismatch_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = TransferTracker::open(store(dir.path()), "f", 2).unwrap();
        // Anything occupying the blob path would break a write or a delete.
        let blob_path = dir.path().join("f.chunk.0");
        std::fs::create_dir_all(blob_path.join("stuck")).unwrap();

        let err = t
            .accept_chunk(0, b"payload", Some(&chunk_hash(b"other")))
            .unwrap_err();
        assert!(matches!(err, P2pError::Integrity(_)));
        assert!(blob_path.join("stuck").is_dir());
        assert_eq!(t.received_count(), 0);
        assert_eq!(store(dir.path()).read_meta("f").unwrap(), None);
    }

    #[test]
    fn test_hash_compare_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = TransferTracker::open(store(dir.path()), "f", 1).unwrap();

        let hash = chunk_hash(b"payload").to_uppercase();
        assert_eq!(t.accept_chunk(0, b"payload", Some(&hash)).unwrap(), ChunkOutcome::Stored);
    }

    #[test]
    fn test_meta_save_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = TransferTracker::open(store(dir.path()), "f", 2).unwrap();
        // A directory where the metadata file belongs makes the rename fail.
        std::fs::create_dir(dir.path().join("f.meta")).unwrap();

        let err = t.accept_chunk(0, b"blob", None).unwrap_err();
        assert!(matches!(err, P2pError::Persistence(_)));
        assert_eq!(t.received_count(), 0);
        assert!(!t.is_received(0));
        assert!(!dir.path().join("f.chunk.0").exists());
    }

    #[test]
    fn test_reopen_restores_received_set() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut t = TransferTracker::open(store(dir.path()), "f", 5).unwrap();
            t.accept_chunk(4, b"d", None).unwrap();
            t.accept_chunk(0, b"a", None).unwrap();
        }
        assert_eq!(std::fs::read_to_string(dir.path().join("f.meta")).unwrap(), "0,4");

        let t = TransferTracker::open(store(dir.path()), "f", 5).unwrap();
        assert_eq!(t.received_chunks(), vec![0, 4]);
        assert_eq!(t.missing_chunks(), vec![1, 2, 3]);
        assert_eq!(t.ack_message().received, "0,4");
        assert_eq!(t.request_message().missing, "1-3");
    }

    #[test]
    fn test_corrupt_meta_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.meta"), "0,7").unwrap();
        assert!(matches!(
            TransferTracker::open(store(dir.path()), "f", 5),
            Err(P2pError::Validation(_))
        ));

        std::fs::write(dir.path().join("f.meta"), "0,x").unwrap();
        assert!(matches!(
            TransferTracker::open(store(dir.path()), "f", 5),
            Err(P2pError::Validation(_))
        ));
    }

    #[test]
    fn test_assemble_incomplete_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = TransferTracker::open(store(dir.path()), "f", 2).unwrap();
        t.accept_chunk(0, b"x", None).unwrap();

        let out = dir.path().join("out.bin");
        let err = t.assemble_to(&out, &generate_file_key()).unwrap_err();
        assert!(matches!(err, P2pError::IncompleteTransfer { received: 1, total: 2 }));
        assert!(!out.exists());
    }

    #[test]
    fn test_assemble_wrong_key_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let key = generate_file_key();
        let mut t = TransferTracker::open(store(dir.path()), "f", 2).unwrap();
        for (i, part) in [b"hello ".as_ref(), b"world".as_ref()].iter().enumerate() {
            t.accept_chunk(i as u32, &encrypt_chunk(&key, part).unwrap(), None).unwrap();
        }

        let out = dir.path().join("out.bin");
        let err = t.assemble_to(&out, &generate_file_key()).unwrap_err();
        assert!(matches!(err, P2pError::Integrity(_)));
        assert!(!out.exists());
        assert!(!tmp_path(&out).exists());

        assert_eq!(t.assemble_to(&out, &key).unwrap(), 11);
        assert_eq!(std::fs::read(&out).unwrap(), b"hello world");
    }

    #[test]
    fn test_assemble_verified_checks_file_hash() {
        let dir = tempfile::tempdir().unwrap();
        let key = generate_file_key();
        let mut t = TransferTracker::open(store(dir.path()), "f", 1).unwrap();
        t.accept_chunk(0, &encrypt_chunk(&key, b"abc").unwrap(), None).unwrap();

        let out = dir.path().join("out.bin");
        let bad = p2pcf_crypto::sha256_hex(b"abd");
        assert!(t.assemble_verified(&out, &key, &bad).is_err());
        assert!(!out.exists());

        let good = p2pcf_crypto::sha256_hex(b"abc");
        assert_eq!(t.assemble_verified(&out, &key, &good).unwrap(), 3);
    }

    #[test]
    fn test_zero_chunk_transfer_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let t = TransferTracker::open(store(dir.path()), "empty", 0).unwrap();
        assert!(t.is_complete());

        let out = dir.path().join("empty.bin");
        assert_eq!(t.assemble_to(&out, &generate_file_key()).unwrap(), 0);
        assert_eq!(std::fs::read(&out).unwrap(), b"");
    }

    #[test]
    fn test_accept_message_checks_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = TransferTracker::open(store(dir.path()), "f", 2).unwrap();
        let msg = FileChunkMessage {
            file_id: "g".into(),
            chunk_index: 0,
            total_chunks: 2,
            chunk_hash: None,
            encrypted_chunk_data: crate::b64_encode(b"blob"),
            signature: None,
        };
        assert!(matches!(t.accept_message(&msg), Err(P2pError::Validation(_))));

        let msg = FileChunkMessage { file_id: "f".into(), ..msg };
        assert_eq!(t.accept_message(&msg).unwrap(), ChunkOutcome::Stored);
    }

    #[test]
    fn test_discard_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = TransferTracker::open(store(dir.path()), "f", 2).unwrap();
        t.accept_chunk(0, b"a", None).unwrap();
        t.discard().unwrap();

        assert!(!dir.path().join("f.chunk.0").exists());
        assert!(!dir.path().join("f.meta").exists());
    }
}
