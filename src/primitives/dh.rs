//! X25519 Diffie-Hellman wrapper.

use rand_core::OsRng;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

#[derive(Error, Debug)]
pub enum DhError {
    #[error("invalid key length")]
    InvalidKeyLength,
}

pub type Result<T> = std::result::Result<T, DhError>;

/// Generate an ephemeral X25519 keypair; the secret can be used for exactly one
/// Diffie-Hellman computation.
pub fn generate_ephemeral_key() -> ([u8; 32], EphemeralSecret) {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (public.to_bytes(), secret)
}

/// Generate a static (reusable) X25519 keypair.
pub fn generate_static_keypair() -> ([u8; 32], [u8; 32]) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (public.to_bytes(), secret.to_bytes())
}

pub fn derive_public_key(private_key: &[u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(*private_key);
    PublicKey::from(&secret).to_bytes()
}

/// Diffie-Hellman between a static private key and a peer public key.
pub fn dh(our_private_key: &[u8; 32], their_public_key: &[u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(*our_private_key);
    let public = PublicKey::from(*their_public_key);
    secret.diffie_hellman(&public).to_bytes()
}

/// Diffie-Hellman consuming an ephemeral secret (single-use).
pub fn dh_ephemeral(our_secret: EphemeralSecret, their_public_key: &[u8; 32]) -> [u8; 32] {
    let public = PublicKey::from(*their_public_key);
    our_secret.diffie_hellman(&public).to_bytes()
}

pub fn key_from_slice(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes.try_into().map_err(|_| DhError::InvalidKeyLength)
}
