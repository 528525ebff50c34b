//! File transfer as seen from the node
//!
//! Outgoing files get a key derived at a freshly reserved `file:` index.
//! Incoming transfers are announced by `file_metadata`, recorded as pending
//! in the node record, and fed chunk by chunk into the transfer manager.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p2pcf_core::message::{
    FileChunkAckMessage, FileChunkMessage, FileChunkRequestMessage, FileMetadataMessage,
};
use p2pcf_core::types::{IndexKind, PendingTransfer};
use p2pcf_core::{P2pError, P2pResult};
use p2pcf_crypto::{unwrap_key, FileKey};
use p2pcf_transfer::{
    check_metadata, new_file_id, validate_file_id, verify_metadata, ChunkOutcome, ChunkedFile,
};
use std::path::Path;

use crate::node::Node;

/// A file chunked into the work directory and ready to announce
#[derive(Debug)]
pub struct OutgoingFile {
    pub chunked: ChunkedFile,
    pub metadata: FileMetadataMessage,
    pub file_key: FileKey,
    /// The `file:` derivation index the key came from
    pub key_index: u64,
}

impl Node {
    /// Chunk and encrypt `path` for sending, and build its signed metadata.
    pub fn prepare_send<F>(
        &self,
        path: &Path,
        file_id: Option<String>,
        chunk_size: usize,
        lock_key: &FileKey,
        on_chunk: F,
    ) -> P2pResult<OutgoingFile>
    where
        F: FnMut(u32, u32),
    {
        let file_id = file_id.unwrap_or_else(new_file_id);
        validate_file_id(&file_id)?;

        let key_index = self.reserve_index(IndexKind::File)?;
        let file_key = self
            .key_derivation()
            .derive_file_key(&IndexKind::File.path(key_index))?;

        let chunker = self.transfers().chunker();
        let chunked = chunker.chunk_file_with(path, &file_id, &file_key, chunk_size, on_chunk)?;
        let metadata = chunker.metadata(
            &chunked,
            &file_key,
            lock_key,
            &self.root_keypair()?,
            Some(self.node_id().to_string()),
        )?;

        Ok(OutgoingFile {
            chunked,
            metadata,
            file_key,
            key_index,
        })
    }

    /// Stored chunks answering a receiver's request.
    pub fn chunk_messages_for(
        &self,
        request: &FileChunkRequestMessage,
    ) -> P2pResult<Vec<FileChunkMessage>> {
        self.transfers().chunker().chunk_messages_for(request)
    }

    /// Register an incoming transfer.
    ///
    /// With `sender_master_key` the metadata signature is verified; without
    /// it only its shape is checked. A named sender must be a known peer.
    /// Returns an ack of what is already on disk, so a resumed transfer
    /// tells the sender where to continue.
    pub fn accept_metadata(
        &self,
        msg: &FileMetadataMessage,
        sender_master_key: Option<&str>,
    ) -> P2pResult<FileChunkAckMessage> {
        match sender_master_key {
            Some(key) => verify_metadata(msg, key)?,
            None => check_metadata(msg)?,
        }
        self.transfers().check_incoming(msg)?;
        if let Some(from) = msg.from.as_deref() {
            if self.peer(from).is_none() {
                tracing::warn!(peer = from, file_id = %msg.file_id, "file metadata from unknown peer");
                return Err(P2pError::authentication(format!(
                    "file metadata from unknown peer {from}"
                )));
            }
        }

        let ack = self
            .transfers()
            .with_tracker(&msg.file_id, msg.total_chunks, |t| Ok(t.ack_message()))?;

        let pending = PendingTransfer {
            file_id: msg.file_id.clone(),
            file_name: msg.file_name.clone(),
            file_size: msg.file_size,
            total_chunks: msg.total_chunks,
            file_hash: msg.file_hash.clone(),
            from: msg.from.clone(),
            locked_file_key: msg.locked_file_key.clone(),
        };
        self.commit("record pending transfer", |r| {
            r.upsert_pending_transfer(pending);
            Ok(())
        })?;

        tracing::info!(file_id = %msg.file_id, total = msg.total_chunks, "incoming transfer registered");
        Ok(ack)
    }

    /// Feed one chunk to its pending transfer.
    pub fn accept_chunk(
        &self,
        msg: &FileChunkMessage,
    ) -> P2pResult<(ChunkOutcome, FileChunkAckMessage)> {
        let pending = self.pending_transfer(&msg.file_id)?;
        if msg.total_chunks != pending.total_chunks {
            return Err(P2pError::validation(format!(
                "chunk claims {} total chunks, transfer {} has {}",
                msg.total_chunks, msg.file_id, pending.total_chunks
            )));
        }
        self.transfers()
            .with_tracker(&msg.file_id, pending.total_chunks, |t| {
                let outcome = t.accept_message(msg)?;
                Ok((outcome, t.ack_message()))
            })
    }

    pub fn pending_transfer(&self, file_id: &str) -> P2pResult<PendingTransfer> {
        self.lock_record()
            .pending_transfer(file_id)
            .cloned()
            .ok_or_else(|| P2pError::validation(format!("no pending transfer {file_id}")))
    }

    /// Recover the file key of a pending transfer with the sender's lock key.
    pub fn unlock_file_key(&self, file_id: &str, lock_key: &FileKey) -> P2pResult<FileKey> {
        let pending = self.pending_transfer(file_id)?;
        let locked = STANDARD
            .decode(&pending.locked_file_key)
            .map_err(|e| P2pError::validation(format!("lockedFileKey: {e}")))?;
        unwrap_key(lock_key, &locked)
    }

    /// Reassemble a fully received transfer into `output`, then drop its
    /// pending record and stored chunks.
    pub fn complete_transfer(
        &self,
        file_id: &str,
        output: &Path,
        file_key: &FileKey,
    ) -> P2pResult<u64> {
        let pending = self.pending_transfer(file_id)?;
        let bytes = self
            .transfers()
            .with_tracker(file_id, pending.total_chunks, |t| {
                if pending.file_hash.is_empty() {
                    t.assemble_to(output, file_key)
                } else {
                    t.assemble_verified(output, file_key, &pending.file_hash)
                }
            })?;

        self.commit("complete transfer", |r| {
            r.remove_pending_transfer(file_id);
            Ok(())
        })?;
        self.transfers().remove(file_id);
        self.transfers()
            .store()
            .discard(file_id, pending.total_chunks)?;

        tracing::info!(file_id, bytes, output = %output.display(), "transfer complete");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::test_node;
    use p2pcf_core::types::Peer;
    use p2pcf_crypto::generate_file_key;

    #[test]
    fn test_prepare_send_reserves_file_index() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = test_node(&dir.path().join("a"));
        let src = dir.path().join("doc.txt");
        std::fs::write(&src, b"0123456789").unwrap();

        let out = a
            .prepare_send(&src, Some("doc".into()), 4, &generate_file_key(), |_, _| {})
            .unwrap();
        assert_eq!(out.key_index, 0);
        assert_eq!(out.chunked.total_chunks, 3);
        assert_eq!(a.indices().file, 1);
        verify_metadata(&out.metadata, a.master_public_key()).unwrap();

        let again = a
            .prepare_send(&src, Some("doc2".into()), 4, &generate_file_key(), |_, _| {})
            .unwrap();
        assert_ne!(again.file_key.as_bytes(), out.file_key.as_bytes());
    }

    #[test]
    fn test_metadata_from_unknown_peer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = test_node(&dir.path().join("a"));
        let (b, _) = test_node(&dir.path().join("b"));
        let src = dir.path().join("doc.txt");
        std::fs::write(&src, b"hello").unwrap();

        let out = a
            .prepare_send(&src, Some("doc".into()), 4, &generate_file_key(), |_, _| {})
            .unwrap();
        assert!(matches!(
            b.accept_metadata(&out.metadata, None),
            Err(P2pError::Authentication(_))
        ));
        assert!(b.pending_transfers().is_empty());
    }

    #[test]
    fn test_chunk_without_metadata_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (b, _) = test_node(&dir.path().join("b"));
        let msg = FileChunkMessage {
            file_id: "nope".into(),
            chunk_index: 0,
            total_chunks: 1,
            ..Default::default()
        };
        assert!(matches!(b.accept_chunk(&msg), Err(P2pError::Validation(_))));
    }

    #[test]
    fn test_full_transfer_between_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = test_node(&dir.path().join("a"));
        let (b, _) = test_node(&dir.path().join("b"));
        b.commit("seed peer", |r| {
            r.peers.upsert(Peer {
                node_id: a.node_id().to_string(),
                ip: "10.0.0.1".into(),
                port: 9000,
                last_seen: 0,
            });
            Ok(())
        })
        .unwrap();

        let original: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let src = dir.path().join("data.bin");
        std::fs::write(&src, &original).unwrap();
        let lock_key = generate_file_key();
        let out = a
            .prepare_send(&src, Some("x1".into()), 300, &lock_key, |_, _| {})
            .unwrap();

        let ack = b
            .accept_metadata(&out.metadata, Some(a.master_public_key()))
            .unwrap();
        assert_eq!(ack.received, "");
        for i in 0..out.chunked.total_chunks {
            let msg = a.transfers().chunker().build_chunk_message("x1", i, 4).unwrap();
            b.accept_chunk(&msg).unwrap();
        }

        let file_key = b.unlock_file_key("x1", &lock_key).unwrap();
        let target = dir.path().join("received/data.bin");
        assert_eq!(b.complete_transfer("x1", &target, &file_key).unwrap(), 1000);
        assert_eq!(std::fs::read(&target).unwrap(), original);
        assert!(b.pending_transfers().is_empty());
        assert!(b.transfers().get("x1").is_none());
    }

    #[test]
    fn test_oversized_announcement_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (b, _) = test_node(&dir.path().join("b"));
        b.commit("seed peer", |r| {
            r.peers.upsert(Peer {
                node_id: "nodeA".into(),
                ip: "10.0.0.1".into(),
                port: 9000,
                last_seen: 0,
            });
            Ok(())
        })
        .unwrap();

        // Self-consistent, but far past what this node will track.
        let flood = FileMetadataMessage {
            from: Some("nodeA".into()),
            file_id: "flood".into(),
            file_name: "flood.bin".into(),
            file_size: u32::MAX as u64,
            chunk_size: 1,
            total_chunks: u32::MAX,
            ..Default::default()
        };
        check_metadata(&flood).unwrap();
        assert!(matches!(
            b.accept_metadata(&flood, None),
            Err(P2pError::Validation(_))
        ));

        let wide = FileMetadataMessage {
            file_id: "wide".into(),
            file_size: 4 << 20,
            chunk_size: 4 << 20,
            total_chunks: 1,
            ..flood
        };
        assert!(matches!(
            b.accept_metadata(&wide, None),
            Err(P2pError::Validation(_))
        ));
        assert!(b.pending_transfers().is_empty());
        assert!(b.transfers().active().is_empty());
    }
}
