//! p2pcf-crypto: key material and AEAD for the p2pcf node
//!
//! Key hierarchy:
//! ```text
//! Password ──PBKDF2-HMAC-SHA256──► vault key ──AES-256-GCM──► sealed master seed (32 B)
//!
//! Master seed
//!   ├── EC keypairs (P-256): HMAC-SHA256 chain over path segments → SHA-256 → scalar
//!   │     ├── root identity key   m/999'/0'/0/0   (nodeId = hex SHA-256 of SPKI)
//!   │     └── ephemeral keys      ephemeral:<index>
//!   └── symmetric keys: HKDF-SHA256(salt = 0^32, info = "file:<index>" …)
//!         └── Chunk AEAD: AES-256-GCM (key = file key, IV = random 96-bit)
//! ```

pub mod chunk;
pub mod derive;
pub mod keys;
pub mod signing;
pub mod vault;

pub use chunk::{chunk_hash, decrypt_chunk, encrypt_chunk, verify_chunk_hash};
pub use derive::{ephemeral_path, KeyDerivation, ROOT_KEY_PATH};
pub use keys::{generate_file_key, unwrap_key, wrap_key, FileKey};
pub use signing::{decode_public_key, encode_public_key, node_id_for, verify_from_base64, EcKeyPair};
pub use vault::{decrypt_seed, encrypt_seed, EncryptedSeed, MasterSeed, VaultParams};

/// Size of a symmetric key / master seed in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the PBKDF2 salt stored with a sealed seed
pub const SALT_SIZE: usize = 16;

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

/// Hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}

/// Fill a fresh buffer from the OS RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}
