//! Per-chunk AES-256-GCM encryption/decryption
//!
//! Encrypted chunk format (binary, identical at rest and in transit):
//! ```text
//! [12 bytes: random IV][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! In transit the blob is accompanied by `chunkHash`, the hex SHA-256 of the
//! whole blob. The hash catches corruption before anything is stored; the tag
//! authenticates the plaintext at reassembly. Both are checked.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use p2pcf_core::{P2pError, P2pResult};

use crate::keys::FileKey;
use crate::{random_bytes, sha256_hex, IV_SIZE, TAG_SIZE};

/// Encrypt a single chunk with AES-256-GCM.
///
/// Returns: `[12-byte IV][ciphertext][16-byte tag]`
pub fn encrypt_chunk(file_key: &FileKey, plaintext: &[u8]) -> P2pResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(file_key.as_bytes().into());

    let iv: [u8; IV_SIZE] = random_bytes();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| P2pError::crypto(format!("chunk encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(IV_SIZE + ciphertext.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a single chunk blob produced by [`encrypt_chunk`].
pub fn decrypt_chunk(file_key: &FileKey, encrypted: &[u8]) -> P2pResult<Vec<u8>> {
    if encrypted.len() < IV_SIZE + TAG_SIZE {
        return Err(P2pError::validation(format!(
            "encrypted chunk too short: {} bytes (minimum {})",
            encrypted.len(),
            IV_SIZE + TAG_SIZE
        )));
    }

    let (iv, ciphertext) = encrypted.split_at(IV_SIZE);
    let cipher = Aes256Gcm::new(file_key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| P2pError::authentication("chunk decryption failed: wrong key or corrupted data"))
}

/// Hex SHA-256 of an encrypted chunk blob (the wire `chunkHash`).
pub fn chunk_hash(blob: &[u8]) -> String {
    sha256_hex(blob)
}

/// Compare a blob against an expected `chunkHash`, ignoring hex case.
pub fn verify_chunk_hash(blob: &[u8], expected: &str) -> bool {
    chunk_hash(blob).eq_ignore_ascii_case(expected.trim())
}
