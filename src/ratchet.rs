//! Pairwise hybrid double ratchet: the core state machine. Every DH epoch is
//! braided with a fresh ML-KEM encapsulation so the new root key depends on
//! both the classical and the post-quantum secret.

use std::num::NonZeroUsize;

use base64::Engine;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RatchetConfig;
use crate::primitives::kem::{self, PqCiphertext, PqKeypair, PqParameterSet};
use crate::primitives::{aead, dh, kdf};
use crate::trace::{self, Category};

#[derive(Error, Debug)]
pub enum RatchetError {
    #[error("no sending chain established yet")]
    SendingChainEmpty,
    #[error("message belongs to a not-yet-established epoch and cannot be processed yet")]
    Deferred,
    #[error("decryption failed: tampered header, wrong key, or evicted skipped key")]
    DecryptFailed,
    #[error("PQ ciphertext for this epoch is missing or does not decapsulate")]
    MissingPqCiphertext,
    #[error("peer's PQ ratchet public key is malformed or the wrong length for its parameter set")]
    InvalidPqPublic,
}

pub type Result<T> = std::result::Result<T, RatchetError>;

#[derive(Clone, Serialize, Deserialize)]
pub struct PqSenderPublic {
    pub bytes: Vec<u8>,
    pub key_id: String,
    pub parameter_set: PqParameterSet,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RatchetHeader {
    pub sender_ratchet_public: [u8; 32],
    pub n: u32,
    pub pn: u32,
    pub pq_sender_public: Option<PqSenderPublic>,
    pub pq_ciphertext: Option<PqCiphertext>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RatchetMessage {
    pub header: RatchetHeader,
    /// `nonce ‖ ciphertext ‖ tag`
    pub payload: Vec<u8>,
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Build the AEAD associated data binding every header field that
/// influences ratchet state, per the exact encoding this crate defines:
/// length-prefixed fields in header-declaration order.
fn build_associated_data(header: &RatchetHeader) -> Vec<u8> {
    let mut ad = Vec::new();
    ad.extend_from_slice(&(header.sender_ratchet_public.len() as u32).to_le_bytes());
    ad.extend_from_slice(&header.sender_ratchet_public);
    ad.extend_from_slice(&header.n.to_le_bytes());
    ad.extend_from_slice(&header.pn.to_le_bytes());

    match &header.pq_sender_public {
        Some(pq) => {
            ad.push(1);
            ad.extend_from_slice(&(pq.bytes.len() as u32).to_le_bytes());
            ad.extend_from_slice(&pq.bytes);
            ad.extend_from_slice(&(pq.key_id.len() as u32).to_le_bytes());
            ad.extend_from_slice(pq.key_id.as_bytes());
            let name = pq.parameter_set.name().as_bytes();
            ad.extend_from_slice(&(name.len() as u32).to_le_bytes());
            ad.extend_from_slice(name);
        }
        None => ad.push(0),
    }

    match &header.pq_ciphertext {
        Some(ct) => {
            ad.extend_from_slice(&(ct.bytes.len() as u32).to_le_bytes());
            ad.extend_from_slice(&ct.bytes);
        }
        None => ad.extend_from_slice(&0u32.to_le_bytes()),
    }

    ad
}

/// A pairwise session's ratchet state. Single-owner: every encrypt/decrypt
/// call is a synchronous state transition, with no internal buffering of
/// messages that cannot yet be processed (see [`RatchetError::Deferred`]).
pub struct PairwiseRatchet {
    config: RatchetConfig,
    root_key: [u8; 32],
    sending_chain_key: Option<[u8; 32]>,
    receiving_chain_key: Option<[u8; 32]>,
    our_sending_ratchet_public: [u8; 32],
    our_sending_ratchet_private: [u8; 32],
    remote_ratchet_public: Option<[u8; 32]>,
    sending_n: u32,
    receiving_n: u32,
    previous_sending_n: u32,
    pq_parameter_set: PqParameterSet,
    our_pq_keypair: PqKeypair,
    remote_pq_public: Option<Vec<u8>>,
    pending_pq_ciphertext: Option<PqCiphertext>,
    pending_pq_sender_public: Option<PqSenderPublic>,
    skipped_keys: LruCache<(String, u32), [u8; 32]>,
}

impl PairwiseRatchet {
    /// Construct the initiator side. `ephemeral_{public,private}` is the
    /// handshake's X3DH ephemeral, reused without rotation as the first
    /// sending ratchet keypair. `responder_initial_ratchet_public` is the
    /// peer's signed prekey public (their starting DH ratchet value).
    /// `our_pq_keypair` is a fresh PQ ratchet keypair generated for this
    /// session; `remote_initial_pq_public` is whichever PQ prekey the
    /// handshake encapsulated to.
    pub fn new_initiator(
        config: RatchetConfig,
        root_key: [u8; 32],
        ephemeral_public: [u8; 32],
        ephemeral_private: [u8; 32],
        responder_initial_ratchet_public: [u8; 32],
        pq_parameter_set: PqParameterSet,
        our_pq_keypair: PqKeypair,
        remote_initial_pq_public: Vec<u8>,
    ) -> Self {
        let cap = NonZeroUsize::new(config.skipped_key_cap.max(1)).unwrap();
        let mut state = Self {
            config,
            root_key,
            sending_chain_key: None,
            receiving_chain_key: None,
            our_sending_ratchet_public: ephemeral_public,
            our_sending_ratchet_private: ephemeral_private,
            remote_ratchet_public: Some(responder_initial_ratchet_public),
            sending_n: 0,
            receiving_n: 0,
            previous_sending_n: 0,
            pq_parameter_set,
            our_pq_keypair,
            remote_pq_public: Some(remote_initial_pq_public),
            pending_pq_ciphertext: None,
            pending_pq_sender_public: None,
            skipped_keys: LruCache::new(cap),
        };
        // The peer PQ public here is whatever the handshake already
        // encapsulated to successfully, so its length is already proven
        // valid for this parameter set.
        state
            .sending_step(true)
            .expect("handshake already validated this PQ public's encoded length");
        trace::event(Category::Session, "initiator ratchet established");
        state
    }

    /// Construct the responder side. The responder has no peer ratchet or PQ
    /// public yet; both become known on the first [`Self::decrypt`] call,
    /// which drives the session into its first DH+PQ epoch.
    /// `signed_prekey_{public,private}` is the device's own medium-term key,
    /// used as the initial (un-rotated) sending ratchet keypair.
    /// `our_pq_identity_keypair` is the device's long-lived PQ identity
    /// prekey (or the one-time PQ prekey the handshake consumed), reused as
    /// the first PQ ratchet keypair.
    pub fn new_responder(
        config: RatchetConfig,
        root_key: [u8; 32],
        signed_prekey_public: [u8; 32],
        signed_prekey_private: [u8; 32],
        pq_parameter_set: PqParameterSet,
        our_pq_identity_keypair: PqKeypair,
    ) -> Self {
        let cap = NonZeroUsize::new(config.skipped_key_cap.max(1)).unwrap();
        Self {
            config,
            root_key,
            sending_chain_key: None,
            receiving_chain_key: None,
            our_sending_ratchet_public: signed_prekey_public,
            our_sending_ratchet_private: signed_prekey_private,
            remote_ratchet_public: None,
            sending_n: 0,
            receiving_n: 0,
            previous_sending_n: 0,
            pq_parameter_set,
            our_pq_keypair: our_pq_identity_keypair,
            remote_pq_public: None,
            pending_pq_ciphertext: None,
            pending_pq_sender_public: None,
            skipped_keys: LruCache::new(cap),
        }
    }

    fn insert_skipped(&mut self, id: (String, u32), key: [u8; 32]) {
        self.skipped_keys.put(id, key);
    }

    /// Rotate the PQ ratchet keypair and (unless `is_very_first_step`, which
    /// only the initiator's inaugural send hits) the DH ratchet keypair,
    /// then derive a fresh root/sending-chain pair. Fails gracefully (rather
    /// than panicking) if `remote_pq_public` — which, on the epoch-advance
    /// path, came straight off a peer-supplied header — has the wrong
    /// encoded length for the parameter set.
    fn sending_step(&mut self, is_very_first_step: bool) -> Result<()> {
        if !is_very_first_step {
            let (public, private) = dh::generate_static_keypair();
            self.our_sending_ratchet_public = public;
            self.our_sending_ratchet_private = private;
        }

        let remote_pq_public = self
            .remote_pq_public
            .clone()
            .expect("sending step requires a known peer PQ public");
        let new_pq_keypair = kem::generate_keypair(self.pq_parameter_set);
        let (ct, pq_shared_secret) = kem::encapsulate_to(self.pq_parameter_set, &remote_pq_public)
            .map_err(|_| RatchetError::InvalidPqPublic)?;

        self.pending_pq_ciphertext = Some(ct);
        self.pending_pq_sender_public = Some(PqSenderPublic {
            bytes: new_pq_keypair.public_bytes.clone(),
            key_id: b64(&new_pq_keypair.public_bytes),
            parameter_set: self.pq_parameter_set,
        });
        self.our_pq_keypair = new_pq_keypair;

        let remote_ratchet = self
            .remote_ratchet_public
            .expect("sending step requires a known peer ratchet public");
        let dh_output = dh::dh(&self.our_sending_ratchet_private, &remote_ratchet);

        let (new_root, new_sending_chain_key) =
            kdf::kdf_root_hybrid(&self.root_key, &dh_output, &pq_shared_secret)
                .expect("hkdf expand with a fixed small length cannot fail");
        self.root_key = new_root;
        self.sending_chain_key = Some(new_sending_chain_key);
        self.sending_n = 0;
        trace::event(Category::Ratchet, "sending step: new DH+PQ epoch derived");
        Ok(())
    }

    /// Encrypt `plaintext`, advancing the sending chain by one step.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<RatchetMessage> {
        let chain_key = self.sending_chain_key.ok_or(RatchetError::SendingChainEmpty)?;
        let (message_key, next_chain_key) = kdf::kdf_chain(&chain_key);
        self.sending_chain_key = Some(next_chain_key);

        let header = RatchetHeader {
            sender_ratchet_public: self.our_sending_ratchet_public,
            n: self.sending_n,
            pn: self.previous_sending_n,
            pq_sender_public: self.pending_pq_sender_public.take(),
            pq_ciphertext: self.pending_pq_ciphertext.take(),
        };
        self.sending_n += 1;

        let ad = build_associated_data(&header);
        let payload = aead::seal(&message_key, plaintext, &ad).map_err(|_| RatchetError::DecryptFailed)?;

        trace::event(Category::Ordering, &format!("sent N={}", header.n));
        Ok(RatchetMessage { header, payload })
    }

    /// Decrypt a message, advancing (or establishing) the receiving chain as
    /// needed. Returns [`RatchetError::Deferred`] when the message starts an
    /// epoch this ratchet cannot yet derive (no PQ material attached); the
    /// caller is responsible for retrying such messages later.
    pub fn decrypt(&mut self, message: &RatchetMessage) -> Result<Vec<u8>> {
        let header = &message.header;
        let cache_id = (b64(&header.sender_ratchet_public), header.n);

        if let Some(message_key) = self.skipped_keys.pop(&cache_id) {
            let ad = build_associated_data(header);
            return aead::open(&message_key, &message.payload, &ad).map_err(|_| RatchetError::DecryptFailed);
        }

        let is_new_epoch = self.receiving_chain_key.is_none()
            || self
                .remote_ratchet_public
                .map_or(true, |known| known != header.sender_ratchet_public);

        if is_new_epoch {
            let pq_ciphertext = header.pq_ciphertext.as_ref().ok_or(RatchetError::Deferred)?;
            let pq_sender_public = header.pq_sender_public.as_ref().ok_or(RatchetError::Deferred)?;

            if let Some(current_ck) = self.receiving_chain_key {
                let remote_id = b64(&self.remote_ratchet_public.expect("receiving chain implies known remote"));
                let mut ck = current_ck;
                while self.receiving_n < header.pn {
                    let (mk, next_ck) = kdf::kdf_chain(&ck);
                    self.insert_skipped((remote_id.clone(), self.receiving_n), mk);
                    ck = next_ck;
                    self.receiving_n += 1;
                }
            }

            self.previous_sending_n = self.sending_n;
            self.receiving_n = 0;

            self.remote_ratchet_public = Some(header.sender_ratchet_public);
            self.remote_pq_public = Some(pq_sender_public.bytes.clone());

            let pq_shared_secret = kem::decapsulate(&self.our_pq_keypair, pq_ciphertext)
                .map_err(|_| RatchetError::MissingPqCiphertext)?;

            let our_priv = self.our_sending_ratchet_private;
            let dh_output = dh::dh(&our_priv, &header.sender_ratchet_public);
            let (new_root, new_receiving_chain_key) =
                kdf::kdf_root_hybrid(&self.root_key, &dh_output, &pq_shared_secret)
                    .map_err(|_| RatchetError::InvalidPqPublic)?;
            self.root_key = new_root;
            self.receiving_chain_key = Some(new_receiving_chain_key);

            self.sending_step(false)?;
            trace::event(Category::Ratchet, "receiving epoch advanced");

            if let Some(message_key) = self.skipped_keys.pop(&cache_id) {
                let ad = build_associated_data(header);
                return aead::open(&message_key, &message.payload, &ad).map_err(|_| RatchetError::DecryptFailed);
            }
        }

        if header.n < self.receiving_n {
            // Already consumed and not in the skipped cache: a replay. Fail
            // without touching chain state, or the next legitimate message's
            // key would be derived and discarded right here.
            return Err(RatchetError::DecryptFailed);
        }

        let remote_id = b64(&self.remote_ratchet_public.expect("epoch handling establishes remote ratchet public"));
        let mut chain_key = self.receiving_chain_key.ok_or(RatchetError::DecryptFailed)?;
        while self.receiving_n < header.n {
            let (mk, next_ck) = kdf::kdf_chain(&chain_key);
            self.insert_skipped((remote_id.clone(), self.receiving_n), mk);
            chain_key = next_ck;
            self.receiving_n += 1;
        }

        let (message_key, next_chain_key) = kdf::kdf_chain(&chain_key);
        self.receiving_chain_key = Some(next_chain_key);
        self.receiving_n += 1;

        let ad = build_associated_data(header);
        trace::event(Category::Ordering, &format!("received N={}", header.n));
        aead::open(&message_key, &message.payload, &ad).map_err(|_| RatchetError::DecryptFailed)
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped_keys.len()
    }
}
