//! AES-256-GCM sealing with a random 12-byte nonce prepended to the
//! ciphertext, as mandated for every pairwise and sender-key message.

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand_core::RngCore;
use thiserror::Error;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum AeadError {
    #[error("seal failed")]
    SealFailed,
    #[error("open failed: authentication tag mismatch or truncated ciphertext")]
    OpenFailed,
}

pub type Result<T> = std::result::Result<T, AeadError>;

/// Encrypt `plaintext` under `key`, binding `associated_data`. Returns
/// `nonce ‖ ciphertext ‖ tag`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| AeadError::SealFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce ‖ ciphertext ‖ tag` blob produced by [`seal`], checking the
/// same associated data that was bound at encryption time.
pub fn open(key: &[u8; KEY_LEN], sealed: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(AeadError::OpenFailed);
    }
    let (nonce_bytes, rest) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: rest,
                aad: associated_data,
            },
        )
        .map_err(|_| AeadError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_matching_aad() {
        let key = [9u8; KEY_LEN];
        let plaintext = b"hybrid ratchet payload";
        let aad = b"header bytes";

        let sealed = seal(&key, plaintext, aad).unwrap();
        let opened = open(&key, &sealed, aad).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn mismatched_aad_fails() {
        let key = [9u8; KEY_LEN];
        let sealed = seal(&key, b"payload", b"aad-a").unwrap();
        assert!(open(&key, &sealed, b"aad-b").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [9u8; KEY_LEN];
        let mut sealed = seal(&key, b"payload", b"aad").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&key, &sealed, b"aad").is_err());
    }
}
