//! Send-side chunking
//!
//! A file is split into fixed-size chunks (the last may be shorter), each
//! sealed with a fresh IV under the file key and stored once. Chunk messages
//! are always rebuilt from the stored blob so a retransmitted chunk is
//! byte-identical to the first copy.

use p2pcf_core::message::{FileChunkMessage, FileChunkRequestMessage, FileMetadataMessage};
use p2pcf_core::{P2pError, P2pResult};
use p2pcf_crypto::{chunk_hash, encrypt_chunk, verify_from_base64, wrap_key, EcKeyPair, FileKey};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::ranges::decode_ranges;
use crate::store::{validate_file_id, ChunkStore};

/// Result of chunking one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedFile {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
    /// Hex SHA-256 of the plaintext
    pub file_hash: String,
    /// Hex SHA-256 of each stored blob, by index
    pub chunk_hashes: Vec<String>,
}

pub struct FileChunker {
    store: ChunkStore,
    max_chunk_size: usize,
}

impl FileChunker {
    pub fn new(store: ChunkStore, max_chunk_size: usize) -> Self {
        Self {
            store,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Requested size clamped to the configured maximum.
    pub fn effective_chunk_size(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_chunk_size)
    }

    pub fn chunk_file(
        &self,
        path: &Path,
        file_id: &str,
        file_key: &FileKey,
        requested_chunk_size: usize,
    ) -> P2pResult<ChunkedFile> {
        self.chunk_file_with(path, file_id, file_key, requested_chunk_size, |_, _| {})
    }

    /// Chunk `path`, calling `on_chunk(index, total)` after each chunk is stored.
    pub fn chunk_file_with<F>(
        &self,
        path: &Path,
        file_id: &str,
        file_key: &FileKey,
        requested_chunk_size: usize,
        mut on_chunk: F,
    ) -> P2pResult<ChunkedFile>
    where
        F: FnMut(u32, u32),
    {
        validate_file_id(file_id)?;
        let chunk_size = self.effective_chunk_size(requested_chunk_size);

        let mut file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let total_chunks = u32::try_from(file_size.div_ceil(chunk_size as u64)).map_err(|_| {
            P2pError::validation(format!(
                "{} needs more than {} chunks of {chunk_size} bytes",
                path.display(),
                u32::MAX
            ))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        let mut chunk_hashes = Vec::with_capacity(total_chunks as usize);
        let mut buf = vec![0u8; chunk_size];
        for index in 0..total_chunks {
            let n = read_full(&mut file, &mut buf)?;
            if n == 0 {
                return Err(P2pError::validation(format!(
                    "{} shrank while chunking",
                    path.display()
                )));
            }
            let plaintext = &buf[..n];
            hasher.update(plaintext);

            let blob = encrypt_chunk(file_key, plaintext)?;
            self.store.write_chunk(file_id, index, &blob)?;
            chunk_hashes.push(chunk_hash(&blob));
            on_chunk(index, total_chunks);
        }

        tracing::info!(file_id, path = %path.display(), file_size, total_chunks, chunk_size, "file chunked");
        Ok(ChunkedFile {
            file_id: file_id.to_string(),
            file_name,
            file_size,
            chunk_size: chunk_size as u32,
            total_chunks,
            file_hash: hex::encode(hasher.finalize()),
            chunk_hashes,
        })
    }

    /// Wire message for a stored chunk. Reads the blob; never re-encrypts.
    pub fn build_chunk_message(
        &self,
        file_id: &str,
        index: u32,
        total_chunks: u32,
    ) -> P2pResult<FileChunkMessage> {
        if index >= total_chunks {
            return Err(P2pError::validation(format!(
                "chunk index {index} out of range for {total_chunks} chunks"
            )));
        }
        let blob = self.store.read_chunk(file_id, index)?;
        Ok(FileChunkMessage {
            file_id: file_id.to_string(),
            chunk_index: index,
            total_chunks,
            chunk_hash: Some(chunk_hash(&blob)),
            encrypted_chunk_data: crate::b64_encode(&blob),
            signature: None,
        })
    }

    /// Chunk messages answering a receiver's `file_chunk_request`.
    pub fn chunk_messages_for(
        &self,
        request: &FileChunkRequestMessage,
    ) -> P2pResult<Vec<FileChunkMessage>> {
        let missing = decode_ranges(&request.missing, request.total_chunks)?;
        tracing::debug!(file_id = %request.file_id, count = missing.len(), "resending requested chunks");
        missing
            .into_iter()
            .map(|i| self.build_chunk_message(&request.file_id, i, request.total_chunks))
            .collect()
    }

    /// Signed `file_metadata` announcing `chunked`.
    ///
    /// The file key travels wrapped under `lock_key`; the signature is made
    /// with the sender's long-term key.
    pub fn metadata(
        &self,
        chunked: &ChunkedFile,
        file_key: &FileKey,
        lock_key: &FileKey,
        signer: &EcKeyPair,
        from: Option<String>,
    ) -> P2pResult<FileMetadataMessage> {
        let locked = wrap_key(lock_key, file_key)?;
        let mut msg = FileMetadataMessage {
            from,
            file_id: chunked.file_id.clone(),
            file_name: chunked.file_name.clone(),
            file_size: chunked.file_size,
            chunk_size: chunked.chunk_size,
            total_chunks: chunked.total_chunks,
            file_hash: chunked.file_hash.clone(),
            locked_file_key: crate::b64_encode(&locked),
            signature: String::new(),
        };
        msg.signature = signer.sign_to_base64(&msg.signing_payload());
        Ok(msg)
    }
}

/// Check a `file_metadata` signature against the sender's base64 SPKI
/// long-term key, and that its sizes are self-consistent.
pub fn verify_metadata(msg: &FileMetadataMessage, master_public_key: &str) -> P2pResult<()> {
    check_metadata(msg)?;
    if msg.signature.is_empty() {
        return Err(P2pError::validation("file metadata is unsigned"));
    }
    verify_from_base64(master_public_key, &msg.signing_payload(), &msg.signature)
}

/// Structural checks on `file_metadata`: a valid id and chunk count that
/// matches the declared sizes.
pub fn check_metadata(msg: &FileMetadataMessage) -> P2pResult<()> {
    validate_file_id(&msg.file_id)?;
    let expected_chunks = if msg.chunk_size == 0 {
        0
    } else {
        msg.file_size.div_ceil(msg.chunk_size as u64)
    };
    if expected_chunks != msg.total_chunks as u64 || (msg.chunk_size == 0 && msg.file_size > 0) {
        return Err(P2pError::validation(format!(
            "file metadata for {} is inconsistent: {} bytes in {} chunks of {}",
            msg.file_id, msg.file_size, msg.total_chunks, msg.chunk_size
        )));
    }
    Ok(())
}

/// Bounds on what a remote sender may announce: the chunk size must fit the
/// configured maximum and the chunk count must stay under `max_total_chunks`.
pub fn check_limits(
    msg: &FileMetadataMessage,
    max_chunk_size: usize,
    max_total_chunks: u32,
) -> P2pResult<()> {
    if msg.chunk_size as usize > max_chunk_size {
        return Err(P2pError::validation(format!(
            "file {} uses {}-byte chunks, limit is {max_chunk_size}",
            msg.file_id, msg.chunk_size
        )));
    }
    if msg.total_chunks > max_total_chunks {
        return Err(P2pError::validation(format!(
            "file {} announces {} chunks, limit is {max_total_chunks}",
            msg.file_id, msg.total_chunks
        )));
    }
    Ok(())
}

/// Read until `buf` is full or EOF; returns bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
