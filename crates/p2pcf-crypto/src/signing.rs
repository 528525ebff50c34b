//! ECDSA P-256 keypairs, SPKI public key encoding and signature helpers
//!
//! Public keys travel as base64 X.509 SubjectPublicKeyInfo DER; signatures
//! as base64 ASN.1 DER over SHA-256 of the UTF-8 payload.

use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p2pcf_core::{P2pError, P2pResult};

use crate::{b64_decode, b64_encode, sha256_hex};

/// A P-256 keypair derived from the master seed.
#[derive(Clone)]
pub struct EcKeyPair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl EcKeyPair {
    pub fn from_signing_key(signing: SigningKey) -> Self {
        let verifying = *signing.verifying_key();
        Self { signing, verifying }
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    /// SPKI DER of the public half.
    pub fn public_key_der(&self) -> P2pResult<Vec<u8>> {
        encode_public_key_der(&self.verifying)
    }

    /// Base64 SPKI of the public half (the wire form).
    pub fn public_key_b64(&self) -> P2pResult<String> {
        encode_public_key(&self.verifying)
    }

    /// Node id for this key: hex SHA-256 of the SPKI DER.
    pub fn node_id(&self) -> P2pResult<String> {
        Ok(node_id_for(&self.public_key_der()?))
    }

    /// Sign `payload` and return the base64 DER signature.
    pub fn sign_to_base64(&self, payload: &str) -> String {
        let signature: Signature = self.signing.sign(payload.as_bytes());
        b64_encode(signature.to_der().as_bytes())
    }
}

impl std::fmt::Debug for EcKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcKeyPair")
            .field("public", &self.public_key_b64().unwrap_or_default())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

fn encode_public_key_der(key: &VerifyingKey) -> P2pResult<Vec<u8>> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| P2pError::crypto(format!("SPKI encoding failed: {e}")))
}

/// Base64 SPKI encoding of a verifying key.
pub fn encode_public_key(key: &VerifyingKey) -> P2pResult<String> {
    Ok(b64_encode(&encode_public_key_der(key)?))
}

/// Decode a base64 SPKI public key.
pub fn decode_public_key(b64: &str) -> P2pResult<VerifyingKey> {
    let der = b64_decode(b64)?;
    VerifyingKey::from_public_key_der(&der)
        .map_err(|e| P2pError::validation(format!("invalid public key: {e}")))
}

/// Hex SHA-256 of an SPKI DER public key.
pub fn node_id_for(spki_der: &[u8]) -> String {
    sha256_hex(spki_der)
}

/// Verify a base64 DER signature over `payload` under a base64 SPKI key.
///
/// Any failure, including an undecodable key or signature, is an
/// authentication failure.
pub fn verify_from_base64(public_key_b64: &str, payload: &str, signature_b64: &str) -> P2pResult<()> {
    let key = decode_public_key(public_key_b64)
        .map_err(|e| P2pError::authentication(e.to_string()))?;
    let der = b64_decode(signature_b64)
        .map_err(|e| P2pError::authentication(format!("signature: {e}")))?;
    let signature = Signature::from_der(&der)
        .map_err(|e| P2pError::authentication(format!("malformed signature: {e}")))?;

    key.verify(payload.as_bytes(), &signature)
        .map_err(|_| P2pError::authentication("signature does not verify"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::KeyDerivation;
    use crate::vault::MasterSeed;

    fn keypair(path: &str) -> EcKeyPair {
        let seed = MasterSeed::from_bytes([9u8; 32]);
        KeyDerivation::new(&seed).derive_ec_keypair(path).unwrap()
    }

    #[test]
    fn test_sign_verify() {
        let kp = keypair("ephemeral:0");
        let sig = kp.sign_to_base64("HANDSHAKE:a:b:k:1");

        verify_from_base64(&kp.public_key_b64().unwrap(), "HANDSHAKE:a:b:k:1", &sig).unwrap();
    }

    #[test]
    fn test_verify_rejects_other_payload() {
        let kp = keypair("ephemeral:0");
        let sig = kp.sign_to_base64("payload");

        let err = verify_from_base64(&kp.public_key_b64().unwrap(), "payload!", &sig).unwrap_err();
        assert!(matches!(err, P2pError::Authentication(_)));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let signer = keypair("ephemeral:0");
        let other = keypair("ephemeral:1");
        let sig = signer.sign_to_base64("payload");

        assert!(verify_from_base64(&other.public_key_b64().unwrap(), "payload", &sig).is_err());
    }

    #[test]
    fn test_garbage_inputs_are_authentication_failures() {
        let kp = keypair("ephemeral:0");
        let pk = kp.public_key_b64().unwrap();

        assert!(matches!(
            verify_from_base64("not base64!", "p", &kp.sign_to_base64("p")),
            Err(P2pError::Authentication(_))
        ));
        assert!(matches!(
            verify_from_base64(&pk, "p", "AAAA"),
            Err(P2pError::Authentication(_))
        ));
    }

    #[test]
    fn test_public_key_roundtrip_and_node_id() {
        let kp = keypair("m/999'/0'/0/0");
        let b64 = kp.public_key_b64().unwrap();
        let decoded = decode_public_key(&b64).unwrap();

        assert_eq!(&decoded, kp.verifying_key());
        let node_id = kp.node_id().unwrap();
        assert_eq!(node_id.len(), 64);
        assert_eq!(node_id, node_id_for(&kp.public_key_der().unwrap()));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let dbg = format!("{:?}", keypair("ephemeral:0"));
        assert!(dbg.contains("REDACTED"));
    }
}
