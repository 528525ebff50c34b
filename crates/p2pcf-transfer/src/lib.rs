//! p2pcf-transfer: encrypted, resumable chunked file transfer
//!
//! # Overview
//! - `store`: on-disk layout of chunk blobs and received-set metadata
//! - `chunker`: send path (split, encrypt, hash, store; metadata and chunk messages)
//! - `tracker`: receive path (verify, store, resume, reassemble)
//! - `manager`: one lock per transfer id
//! - `ranges`: compact `"a-b,c"` index-set codec used on the wire

pub mod chunker;
pub mod manager;
pub mod ranges;
pub mod store;
pub mod tracker;

pub use chunker::{check_limits, check_metadata, verify_metadata, ChunkedFile, FileChunker};
pub use manager::{SharedTracker, TransferManager};
pub use ranges::{decode_ranges, encode_ranges};
pub use store::{validate_file_id, ChunkStore};
pub use tracker::{ChunkOutcome, TransferTracker};

/// New random transfer id.
pub fn new_file_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn b64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

pub(crate) fn b64_decode(s: &str) -> p2pcf_core::P2pResult<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(s)
        .map_err(|e| p2pcf_core::P2pError::validation(format!("base64 decode: {e}")))
}
