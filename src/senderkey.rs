//! Sender-key ratchet for group messages: one independent symmetric chain
//! per (group, sender), advanced by the same `KDF_CK` as the pairwise
//! ratchet, with every message individually Ed25519-signed.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RatchetConfig;
use crate::primitives::{aead, kdf, sign};
use crate::trace::{self, Category};

#[derive(Error, Debug)]
pub enum SenderKeyError {
    #[error("signature does not verify")]
    InvalidGroupSignature,
    #[error("decryption failed: tampered payload or evicted skipped key")]
    DecryptFailed,
    #[error("message counter is too old and was already evicted")]
    Discarded,
}

pub type Result<T> = std::result::Result<T, SenderKeyError>;

#[derive(Clone, Serialize, Deserialize)]
pub struct SenderKeyMessage {
    pub group_id: String,
    pub sender_id: String,
    pub counter: u32,
    pub signature: [u8; 64],
    /// `nonce ‖ ciphertext ‖ tag`
    pub payload: Vec<u8>,
}

fn associated_data(group_id: &str, sender_id: &str, counter: u32) -> Vec<u8> {
    let mut ad = Vec::new();
    ad.extend_from_slice(&(group_id.len() as u32).to_le_bytes());
    ad.extend_from_slice(group_id.as_bytes());
    ad.extend_from_slice(&(sender_id.len() as u32).to_le_bytes());
    ad.extend_from_slice(sender_id.as_bytes());
    ad.extend_from_slice(&counter.to_le_bytes());
    ad
}

fn signed_message(nonce_ct_tag: &[u8]) -> &[u8] {
    nonce_ct_tag
}

/// The sender's own state: owns the signing private key and advances the
/// chain forward on every send.
pub struct SenderKeyState {
    pub group_id: String,
    pub sender_id: String,
    signing_public: [u8; 32],
    signing_private: [u8; 32],
    chain_key: [u8; 32],
    counter: u32,
}

impl SenderKeyState {
    pub fn new(group_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        let (signing_public, signing_private) = sign::generate_keypair();
        let chain_key = rand_chain_key();
        Self {
            group_id: group_id.into(),
            sender_id: sender_id.into(),
            signing_public,
            signing_private,
            chain_key,
            counter: 0,
        }
    }

    pub fn signing_public(&self) -> [u8; 32] {
        self.signing_public
    }

    pub fn chain_key(&self) -> [u8; 32] {
        self.chain_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> SenderKeyMessage {
        let (message_key, next_chain_key) = kdf::kdf_chain(&self.chain_key);
        let counter = self.counter;
        self.chain_key = next_chain_key;
        self.counter += 1;

        let ad = associated_data(&self.group_id, &self.sender_id, counter);
        let payload = aead::seal(&message_key, plaintext, &ad).expect("AES-256-GCM seal cannot fail");
        let signature = sign::sign(signed_message(&payload), &self.signing_private);

        trace::event(Category::Group, &format!("group send counter={counter}"));
        SenderKeyMessage {
            group_id: self.group_id.clone(),
            sender_id: self.sender_id.clone(),
            counter,
            signature,
            payload,
        }
    }
}

fn rand_chain_key() -> [u8; 32] {
    use rand_core::RngCore;
    let mut ck = [0u8; 32];
    rand_core::OsRng.fill_bytes(&mut ck);
    ck
}

/// A receiver's view of a remote sender's chain: public signing key plus
/// independently-advancing chain state and a bounded skipped-key cache.
pub struct ReceiverSenderKeyState {
    pub group_id: String,
    pub sender_id: String,
    signing_public: [u8; 32],
    chain_key: [u8; 32],
    counter: u32,
    skipped_keys: LruCache<u32, [u8; 32]>,
}

impl ReceiverSenderKeyState {
    pub fn new(
        group_id: impl Into<String>,
        sender_id: impl Into<String>,
        signing_public: [u8; 32],
        initial_chain_key: [u8; 32],
        config: RatchetConfig,
    ) -> Self {
        let cap = NonZeroUsize::new(config.group_skipped_key_cap.max(1)).unwrap();
        Self {
            group_id: group_id.into(),
            sender_id: sender_id.into(),
            signing_public,
            chain_key: initial_chain_key,
            counter: 0,
            skipped_keys: LruCache::new(cap),
        }
    }

    pub fn decrypt(&mut self, message: &SenderKeyMessage) -> Result<Vec<u8>> {
        if !sign::verify(signed_message(&message.payload), &message.signature, &self.signing_public)
            .map_err(|_| SenderKeyError::InvalidGroupSignature)?
        {
            return Err(SenderKeyError::InvalidGroupSignature);
        }

        let ad = associated_data(&message.group_id, &message.sender_id, message.counter);

        if message.counter < self.counter {
            let message_key = self
                .skipped_keys
                .pop(&message.counter)
                .ok_or(SenderKeyError::Discarded)?;
            return aead::open(&message_key, &message.payload, &ad).map_err(|_| SenderKeyError::DecryptFailed);
        }

        while self.counter < message.counter {
            let (mk, next_ck) = kdf::kdf_chain(&self.chain_key);
            self.skipped_keys.put(self.counter, mk);
            self.chain_key = next_ck;
            self.counter += 1;
        }

        let (message_key, next_chain_key) = kdf::kdf_chain(&self.chain_key);
        self.chain_key = next_chain_key;
        self.counter += 1;

        trace::event(Category::Group, &format!("group receive counter={}", message.counter));
        aead::open(&message_key, &message.payload, &ad).map_err(|_| SenderKeyError::DecryptFailed)
    }

    /// Populate the skipped cache up to (but not including) `target_counter`
    /// without decrypting anything, honoring the eviction cap. Exposed for
    /// exercising the cap's eviction order directly.
    pub fn fast_forward(&mut self, target_counter: u32) {
        while self.counter < target_counter {
            let (mk, next_ck) = kdf::kdf_chain(&self.chain_key);
            self.skipped_keys.put(self.counter, mk);
            self.chain_key = next_ck;
            self.counter += 1;
        }
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped_keys.len()
    }

    pub fn has_skipped(&self, counter: u32) -> bool {
        self.skipped_keys.contains(&counter)
    }
}
