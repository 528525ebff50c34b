//! File keys and key wrapping

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use p2pcf_core::{P2pError, P2pResult};
use zeroize::Zeroize;

use crate::{random_bytes, IV_SIZE, KEY_SIZE, TAG_SIZE};

/// A per-file 256-bit encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from a slice that must be exactly [`KEY_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> P2pResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            P2pError::validation(format!(
                "file key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(s: &str) -> P2pResult<Self> {
        let mut decoded = hex::decode(s.trim())
            .map_err(|e| P2pError::validation(format!("file key hex: {e}")))?;
        let key = Self::from_slice(&decoded);
        decoded.zeroize();
        key
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit file encryption key.
pub fn generate_file_key() -> FileKey {
    FileKey::from_bytes(random_bytes())
}

/// Wrap (encrypt) a file key under a lock key.
///
/// Uses AES-256-GCM with a random IV.
/// Output: `[12-byte IV][ciphertext + 16-byte tag]`
pub fn wrap_key(lock_key: &FileKey, file_key: &FileKey) -> P2pResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(lock_key.as_bytes().into());

    let iv: [u8; IV_SIZE] = random_bytes();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), file_key.as_bytes().as_ref())
        .map_err(|e| P2pError::crypto(format!("key wrapping failed: {e}")))?;

    let mut result = Vec::with_capacity(IV_SIZE + ciphertext.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Unwrap (decrypt) a file key.
///
/// Input: `[12-byte IV][ciphertext + 16-byte tag]` (output of `wrap_key`)
pub fn unwrap_key(lock_key: &FileKey, wrapped: &[u8]) -> P2pResult<FileKey> {
    if wrapped.len() < IV_SIZE + KEY_SIZE + TAG_SIZE {
        return Err(P2pError::validation(format!(
            "wrapped key too short: {} bytes (expected at least {})",
            wrapped.len(),
            IV_SIZE + KEY_SIZE + TAG_SIZE
        )));
    }

    let (iv, ciphertext) = wrapped.split_at(IV_SIZE);
    let cipher = Aes256Gcm::new(lock_key.as_bytes().into());

    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| P2pError::authentication("key unwrapping failed: wrong lock key or corrupted data"))?;

    let key = FileKey::from_slice(&plaintext);
    plaintext.zeroize();
    key
}
