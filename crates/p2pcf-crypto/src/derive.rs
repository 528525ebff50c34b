//! Deterministic key derivation from the master seed
//!
//! Two families of keys hang off the seed:
//!
//! - EC keypairs by path: an HMAC-SHA256 chain over the path segments, hashed
//!   once more with SHA-256 and reduced into `[1, n-1]` for P-256.
//! - Symmetric keys by info string: HKDF-SHA256 with an all-zero salt.
//!
//! Derivation is pure: the same seed and path always give the same key.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::bigint::{Encoding, U256};
use p256::elliptic_curve::Curve;
use p256::{FieldBytes, NistP256};
use p2pcf_core::{P2pError, P2pResult};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::keys::FileKey;
use crate::signing::EcKeyPair;
use crate::vault::MasterSeed;
use crate::KEY_SIZE;

/// Path of the node's long-term identity key.
pub const ROOT_KEY_PATH: &str = "m/999'/0'/0/0";

/// Largest HKDF-SHA256 output.
const MAX_OKM_LEN: usize = 255 * 32;

/// Derivation path of the ephemeral handshake key at `index`.
pub fn ephemeral_path(index: u64) -> String {
    format!("ephemeral:{index}")
}

/// Key derivation bound to one unlocked master seed.
pub struct KeyDerivation<'a> {
    seed: &'a MasterSeed,
}

impl<'a> KeyDerivation<'a> {
    pub fn new(seed: &'a MasterSeed) -> Self {
        Self { seed }
    }

    /// HMAC chain over the segments of `path`.
    ///
    /// The path is lower-cased and split on `/`; `m` and empty segments are
    /// skipped. A path with no remaining segment is rejected.
    pub fn derive_bytes_for_path(&self, path: &str) -> P2pResult<Zeroizing<[u8; KEY_SIZE]>> {
        let lowered = path.to_lowercase();
        let segments: Vec<&str> = lowered
            .split('/')
            .filter(|s| !s.is_empty() && *s != "m")
            .collect();
        if segments.is_empty() {
            return Err(P2pError::validation(format!(
                "derivation path has no segments: {path:?}"
            )));
        }

        let mut key = Zeroizing::new(*self.seed.as_bytes());
        for segment in segments {
            let mut mac = Hmac::<Sha256>::new_from_slice(key.as_ref())
                .map_err(|e| P2pError::crypto(format!("HMAC init failed: {e}")))?;
            mac.update(segment.as_bytes());
            key.copy_from_slice(&mac.finalize().into_bytes());
        }
        Ok(key)
    }

    /// P-256 keypair at `path`.
    pub fn derive_ec_keypair(&self, path: &str) -> P2pResult<EcKeyPair> {
        let chain = self.derive_bytes_for_path(path)?;
        let mut digest = Zeroizing::new([0u8; KEY_SIZE]);
        digest.copy_from_slice(&Sha256::digest(chain.as_ref()));

        let scalar = Zeroizing::new(reduce_to_scalar(&digest));
        let signing = SigningKey::from_bytes(&FieldBytes::clone_from_slice(scalar.as_ref()))
            .map_err(|e| P2pError::crypto(format!("derived scalar rejected: {e}")))?;

        tracing::trace!(path, "derived EC keypair");
        Ok(EcKeyPair::from_signing_key(signing))
    }

    /// Long-term identity keypair.
    pub fn root_keypair(&self) -> P2pResult<EcKeyPair> {
        self.derive_ec_keypair(ROOT_KEY_PATH)
    }

    /// Ephemeral handshake keypair at a reserved index.
    pub fn ephemeral_keypair(&self, index: u64) -> P2pResult<EcKeyPair> {
        self.derive_ec_keypair(&ephemeral_path(index))
    }

    /// HKDF-SHA256 (zero salt) of the seed, `out_len` bytes in `[1, 8160]`.
    pub fn derive_symmetric_key(&self, info: &str, out_len: usize) -> P2pResult<Zeroizing<Vec<u8>>> {
        if out_len == 0 || out_len > MAX_OKM_LEN {
            return Err(P2pError::validation(format!(
                "symmetric key length must be in 1..={MAX_OKM_LEN}, got {out_len}"
            )));
        }
        // A `None` salt is HashLen zero bytes.
        let hkdf = Hkdf::<Sha256>::new(None, self.seed.as_bytes());
        let mut okm = Zeroizing::new(vec![0u8; out_len]);
        hkdf.expand(info.as_bytes(), okm.as_mut_slice())
            .map_err(|e| P2pError::crypto(format!("HKDF expand failed: {e}")))?;
        Ok(okm)
    }

    /// 32-byte file key at `info` (e.g. `"file:3"`).
    pub fn derive_file_key(&self, info: &str) -> P2pResult<FileKey> {
        let okm = self.derive_symmetric_key(info, KEY_SIZE)?;
        FileKey::from_slice(&okm)
    }
}

/// `d = (d0 mod (n - 1)) + 1` for the P-256 group order `n`.
fn reduce_to_scalar(digest: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let n_minus_one = NistP256::ORDER.wrapping_sub(&U256::ONE);
    let mut d = U256::from_be_bytes(*digest);
    // d0 < 2^256 < 2(n - 1), so one subtraction completes the reduction.
    if d >= n_minus_one {
        d = d.wrapping_sub(&n_minus_one);
    }
    d.wrapping_add(&U256::ONE).to_be_bytes()
}
