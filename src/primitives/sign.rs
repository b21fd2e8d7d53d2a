//! Ed25519 signing wrapper, used for identity signatures and per-message
//! sender-key signatures.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignError {
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("invalid signature encoding")]
    InvalidSignature,
}

pub type Result<T> = std::result::Result<T, SignError>;

/// Generate an Ed25519 keypair as (public, private).
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let signing_key = SigningKey::generate(&mut OsRng);
    (signing_key.verifying_key().to_bytes(), signing_key.to_bytes())
}

pub fn sign(data: &[u8], private_key: &[u8; 32]) -> [u8; 64] {
    SigningKey::from_bytes(private_key).sign(data).to_bytes()
}

pub fn verify(data: &[u8], signature: &[u8; 64], public_key: &[u8; 32]) -> Result<bool> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| SignError::InvalidKeyLength)?;
    let sig = Signature::from_bytes(signature);
    Ok(verifying_key.verify(data, &sig).is_ok())
}

pub fn derive_public_key(private_key: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(private_key).verifying_key().to_bytes()
}

pub fn key_from_slice(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes.try_into().map_err(|_| SignError::InvalidKeyLength)
}

pub fn signature_from_slice(bytes: &[u8]) -> Result<[u8; 64]> {
    bytes.try_into().map_err(|_| SignError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let (public, private) = generate_keypair();
        let data = b"a message to authenticate";

        let signature = sign(data, &private);
        assert!(verify(data, &signature, &public).unwrap());
    }

    #[test]
    fn tampered_signature_fails() {
        let (public, private) = generate_keypair();
        let data = b"a message to authenticate";

        let mut signature = sign(data, &private);
        signature[0] ^= 0x01;

        assert!(!verify(data, &signature, &public).unwrap());
    }

    #[test]
    fn derive_public_key_matches_generation() {
        let (expected_public, private) = generate_keypair();
        assert_eq!(derive_public_key(&private), expected_public);
    }
}
