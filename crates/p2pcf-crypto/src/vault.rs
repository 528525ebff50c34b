//! Password envelope for the master seed: PBKDF2-HMAC-SHA256 → AES-256-GCM

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hmac::Hmac;
use p2pcf_core::{P2pError, P2pResult};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::{b64_decode, b64_encode, random_bytes, IV_SIZE, KEY_SIZE, SALT_SIZE};

/// The node's 32-byte master seed.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterSeed {
    bytes: [u8; KEY_SIZE],
}

impl MasterSeed {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Fresh seed from the OS RNG.
    pub fn generate() -> Self {
        Self::from_bytes(random_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterSeed {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSeed")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2 parameters for sealing a seed
#[derive(Debug, Clone, Copy)]
pub struct VaultParams {
    /// PBKDF2-HMAC-SHA256 iterations (default: 200000)
    pub iterations: u32,
}

impl Default for VaultParams {
    fn default() -> Self {
        Self {
            iterations: 200_000,
        }
    }
}

/// A sealed master seed as stored in the node record.
///
/// All binary fields are base64; `ciphertext` carries the 16-byte GCM tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSeed {
    pub salt: String,
    pub iterations: u32,
    pub iv: String,
    pub ciphertext: String,
}

/// Seal `seed` under `password`.
pub fn encrypt_seed(
    seed: &MasterSeed,
    password: &SecretString,
    params: &VaultParams,
) -> P2pResult<EncryptedSeed> {
    if params.iterations == 0 {
        return Err(P2pError::validation("PBKDF2 iterations must be >= 1"));
    }

    let salt: [u8; SALT_SIZE] = random_bytes();
    let key = derive_vault_key(password, &salt, params.iterations)?;

    let iv: [u8; IV_SIZE] = random_bytes();
    let cipher = Aes256Gcm::new(key.as_ref().into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), seed.as_bytes().as_ref())
        .map_err(|e| P2pError::crypto(format!("seed encryption failed: {e}")))?;

    Ok(EncryptedSeed {
        salt: b64_encode(&salt),
        iterations: params.iterations,
        iv: b64_encode(&iv),
        ciphertext: b64_encode(&ciphertext),
    })
}

/// Open a sealed seed. A wrong password or any corruption of the blob is an
/// authentication failure; nothing partially decrypted is ever returned.
pub fn decrypt_seed(sealed: &EncryptedSeed, password: &SecretString) -> P2pResult<MasterSeed> {
    if sealed.iterations == 0 {
        return Err(P2pError::validation("PBKDF2 iterations must be >= 1"));
    }
    let salt = b64_decode(&sealed.salt)?;
    let iv = b64_decode(&sealed.iv)?;
    let ciphertext = b64_decode(&sealed.ciphertext)?;
    if iv.len() != IV_SIZE {
        return Err(P2pError::validation(format!(
            "vault IV must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }

    let key = derive_vault_key(password, &salt, sealed.iterations)?;
    let cipher = Aes256Gcm::new(key.as_ref().into());
    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| P2pError::authentication("bad password or corrupted vault"))?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(P2pError::authentication(format!(
            "vault plaintext has wrong size: {} bytes",
            plaintext.len()
        )));
    }

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();
    Ok(MasterSeed::from_bytes(bytes))
}

fn derive_vault_key(
    password: &SecretString,
    salt: &[u8],
    iterations: u32,
) -> P2pResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(
        password.expose_secret().as_bytes(),
        salt,
        iterations,
        key.as_mut(),
    )
    .map_err(|e| P2pError::crypto(format!("PBKDF2 failed: {e}")))?;
    Ok(key)
}
