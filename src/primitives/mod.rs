//! Cryptographic primitive wrappers: classical DH and signing, the PQ KEM,
//! the symmetric AEAD, and the KDF formulas that stitch them together into
//! root and chain keys.

pub mod aead;
pub mod dh;
pub mod kdf;
pub mod kem;
pub mod sign;
