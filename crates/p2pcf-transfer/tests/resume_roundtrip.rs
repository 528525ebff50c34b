//! End-to-end send/receive through two separate work directories.
//!
//! The sender chunks a file, the receiver accepts chunk messages in arbitrary
//! order across tracker reopenings, and the reassembled file must match the
//! original byte-for-byte.

use p2pcf_core::message::{FileChunkMessage, Message};
use p2pcf_core::P2pError;
use p2pcf_crypto::{generate_file_key, KeyDerivation, MasterSeed};
use p2pcf_transfer::{
    decode_ranges, verify_metadata, ChunkOutcome, ChunkStore, FileChunker, TransferManager,
    TransferTracker,
};
use proptest::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const MIB: usize = 1024 * 1024;

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
        .collect()
}

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

/// Serialize through JSON as a real peer would see it.
fn over_the_wire(msg: FileChunkMessage) -> FileChunkMessage {
    let json = Message::FileChunk(msg).to_json().unwrap();
    match Message::from_json(&json).unwrap() {
        Message::FileChunk(m) => m,
        other => panic!("decoded as {}", other.kind()),
    }
}

#[test]
fn ten_megabytes_in_one_megabyte_chunks() {
    let tmp = TempDir::new().unwrap();
    let original = make_data(10 * MIB);
    let src = write_test_file(tmp.path(), "big.bin", &original);
    let file_key = generate_file_key();

    let sender = FileChunker::new(ChunkStore::open(tmp.path().join("send")).unwrap(), MIB);
    let chunked = sender.chunk_file(&src, "xfer-1", &file_key, MIB).unwrap();
    assert_eq!(chunked.total_chunks, 10);

    let receiver = TransferManager::open(&tmp.path().join("recv"), MIB, 1 << 20).unwrap();
    for i in 0..9 {
        let msg = over_the_wire(sender.build_chunk_message("xfer-1", i, 10).unwrap());
        let outcome = receiver
            .with_tracker("xfer-1", 10, |t| t.accept_message(&msg))
            .unwrap();
        assert_eq!(outcome, ChunkOutcome::Stored);
    }

    let request = receiver
        .with_tracker("xfer-1", 10, |t| {
            assert_eq!(t.missing_chunks(), vec![9]);
            Ok(t.request_message())
        })
        .unwrap();
    assert_eq!(request.missing, "9");

    let out = tmp.path().join("out/big.bin");
    let early = receiver.with_tracker("xfer-1", 10, |t| t.assemble_to(&out, &file_key));
    assert!(matches!(early, Err(P2pError::IncompleteTransfer { received: 9, total: 10 })));
    assert!(!out.exists());

    for msg in sender.chunk_messages_for(&request).unwrap() {
        let msg = over_the_wire(msg);
        receiver
            .with_tracker("xfer-1", 10, |t| t.accept_message(&msg))
            .unwrap();
    }

    let bytes = receiver
        .with_tracker("xfer-1", 10, |t| {
            assert!(t.missing_chunks().is_empty());
            t.assemble_verified(&out, &file_key, &chunked.file_hash)
        })
        .unwrap();
    assert_eq!(bytes, original.len() as u64);
    assert_eq!(std::fs::read(&out).unwrap(), original);
}

#[test]
fn corrupted_chunk_is_rejected_and_can_be_resent() {
    let tmp = TempDir::new().unwrap();
    let src = write_test_file(tmp.path(), "f.txt", &make_data(4000));
    let file_key = generate_file_key();

    let sender = FileChunker::new(ChunkStore::open(tmp.path().join("send")).unwrap(), 1000);
    sender.chunk_file(&src, "f", &file_key, 1000).unwrap();

    let store = ChunkStore::open(tmp.path().join("recv")).unwrap();
    let mut tracker = TransferTracker::open(store, "f", 4).unwrap();

    let good = sender.build_chunk_message("f", 2, 4).unwrap();
    let mut bad = good.clone();
    let mut data = bad.encrypted_chunk_data.into_bytes();
    data[20] = if data[20] == b'A' { b'B' } else { b'A' };
    bad.encrypted_chunk_data = String::from_utf8(data).unwrap();

    assert!(matches!(tracker.accept_message(&bad), Err(P2pError::Integrity(_))));
    assert_eq!(tracker.received_count(), 0);

    assert_eq!(tracker.accept_message(&good).unwrap(), ChunkOutcome::Stored);
    assert_eq!(tracker.accept_message(&good).unwrap(), ChunkOutcome::Duplicate);
    assert_eq!(decode_ranges(&tracker.ack_message().received, 4).unwrap(), vec![2]);
}

#[test]
fn signed_metadata_travels_with_the_transfer() {
    let tmp = TempDir::new().unwrap();
    let src = write_test_file(tmp.path(), "notes.md", b"# notes\n");
    let seed = MasterSeed::from_bytes([8u8; 32]);
    let kd = KeyDerivation::new(&seed);
    let root = kd.root_keypair().unwrap();
    let file_key = kd.derive_file_key("file:0").unwrap();
    let lock_key = generate_file_key();

    let sender = FileChunker::new(ChunkStore::open(tmp.path().join("send")).unwrap(), 4);
    let chunked = sender.chunk_file(&src, "n1", &file_key, 4).unwrap();
    let meta = sender
        .metadata(&chunked, &file_key, &lock_key, &root, None)
        .unwrap();

    let json = Message::FileMetadata(meta).to_json().unwrap();
    let Message::FileMetadata(received) = Message::from_json(&json).unwrap() else {
        panic!("expected file_metadata");
    };
    verify_metadata(&received, &root.public_key_b64().unwrap()).unwrap();
    assert_eq!(received.total_chunks, 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Any arrival order, with a tracker reopen after every few chunks,
    /// completes exactly when the last distinct chunk lands.
    #[test]
    fn resumable_in_any_order(
        order in Just((0u32..12).collect::<Vec<_>>()).prop_shuffle(),
        reopen_every in 1usize..5,
    ) {
        let tmp = TempDir::new().unwrap();
        let original = make_data(12 * 64 - 17);
        let src = write_test_file(tmp.path(), "p.bin", &original);
        let key = generate_file_key();

        let sender = FileChunker::new(ChunkStore::open(tmp.path().join("send")).unwrap(), 64);
        let chunked = sender.chunk_file(&src, "p", &key, 64).unwrap();
        prop_assert_eq!(chunked.total_chunks, 12);

        let recv_dir = tmp.path().join("recv");
        let open = || TransferTracker::open(ChunkStore::open(&recv_dir).unwrap(), "p", 12).unwrap();
        let mut tracker = open();

        for (n, index) in order.iter().enumerate() {
            if n % reopen_every == 0 {
                tracker = open();
            }
            prop_assert!(!tracker.is_complete());
            let msg = sender.build_chunk_message("p", *index, 12).unwrap();
            prop_assert_eq!(tracker.accept_message(&msg).unwrap(), ChunkOutcome::Stored);
            prop_assert_eq!(tracker.accept_message(&msg).unwrap(), ChunkOutcome::Duplicate);
            prop_assert_eq!(tracker.received_count(), n + 1);
        }

        let tracker = open();
        prop_assert!(tracker.missing_chunks().is_empty());
        let out = tmp.path().join("p.out");
        tracker.assemble_to(&out, &key).unwrap();
        prop_assert_eq!(std::fs::read(&out).unwrap(), original);
    }
}
