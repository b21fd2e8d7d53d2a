//! Per-device keystore: long-term identity keys, a medium-term signed
//! prekey, and one-time classical and PQ prekeys consumed at most once.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::config::DeviceConfig;
use crate::primitives::kem::{self, PqCiphertext, PqKeypair, PqParameterSet};
use crate::primitives::{dh, sign};
use crate::trace::{self, Category};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("one-time key {0} not found or already consumed")]
    KeyNotFound(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

struct OneTimePreKey {
    public: [u8; 32],
    private: [u8; 32],
}

impl Drop for OneTimePreKey {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

/// A device's signed medium-term agreement key, signed by the device's
/// long-term identity signing key over `id ‖ public ‖ timestamp`.
pub struct SignedPreKey {
    pub id: u32,
    pub public: [u8; 32],
    private: [u8; 32],
    pub signature: [u8; 64],
    pub created_at: DateTime<Utc>,
}

impl Drop for SignedPreKey {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

pub(crate) fn signed_prekey_message(id: u32, public: &[u8; 32], created_at: &DateTime<Utc>) -> Vec<u8> {
    let mut msg = Vec::with_capacity(4 + 32 + 8);
    msg.extend_from_slice(&id.to_le_bytes());
    msg.extend_from_slice(public);
    msg.extend_from_slice(&created_at.timestamp().to_le_bytes());
    msg
}

pub(crate) fn pq_prekey_message(parameter_set: PqParameterSet, public_bytes: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(public_bytes.len() + 16);
    msg.extend_from_slice(parameter_set.name().as_bytes());
    msg.extend_from_slice(public_bytes);
    msg
}

/// The public half of a device's material, as served by the prekey directory.
/// Carries every currently-unconsumed one-time key (not just one), so the
/// directory can enqueue the full set regardless of how many times `publish`
/// has run.
#[derive(Clone)]
pub struct PublishedBundle {
    pub device_id: String,
    pub identity_signing_public: [u8; 32],
    pub identity_agreement_public: [u8; 32],
    pub signed_prekey_id: u32,
    pub signed_prekey_public: [u8; 32],
    pub signed_prekey_signature: [u8; 64],
    pub signed_prekey_created_at: DateTime<Utc>,
    pub one_time_prekeys: Vec<(String, [u8; 32])>,
    pub pq_parameter_set: PqParameterSet,
    pub pq_identity_prekey_public: Vec<u8>,
    pub pq_identity_prekey_signature: [u8; 64],
    pub pq_one_time_prekeys: Vec<(String, Vec<u8>)>,
}

pub struct DeviceKeystore {
    pub device_id: String,
    config: DeviceConfig,
    identity_signing_public: [u8; 32],
    identity_signing_private: [u8; 32],
    identity_agreement_public: [u8; 32],
    identity_agreement_private: [u8; 32],
    signed_prekey: SignedPreKey,
    one_time_prekeys: Mutex<HashMap<String, OneTimePreKey>>,
    pq_identity_prekey: PqKeypair,
    pq_identity_prekey_signature: [u8; 64],
    pq_one_time_prekeys: Mutex<HashMap<String, PqKeypair>>,
}

impl Drop for DeviceKeystore {
    fn drop(&mut self) {
        self.identity_signing_private.zeroize();
        self.identity_agreement_private.zeroize();
    }
}

impl DeviceKeystore {
    /// Issue a fresh device identity: long-term keys, one signed prekey, and
    /// `config.one_time_prekey_count` one-time keys of each kind.
    pub fn new(device_id: impl Into<String>, config: DeviceConfig) -> Self {
        let device_id = device_id.into();
        let (identity_signing_public, identity_signing_private) = sign::generate_keypair();
        let (identity_agreement_public, identity_agreement_private) = dh::generate_static_keypair();

        let (spk_public, spk_private) = dh::generate_static_keypair();
        let spk_id: u32 = rand::random();
        let created_at = Utc::now();
        let spk_signature = sign::sign(
            &signed_prekey_message(spk_id, &spk_public, &created_at),
            &identity_signing_private,
        );
        let signed_prekey = SignedPreKey {
            id: spk_id,
            public: spk_public,
            private: spk_private,
            signature: spk_signature,
            created_at,
        };

        let mut one_time_prekeys = HashMap::new();
        for _ in 0..config.one_time_prekey_count {
            let (public, private) = dh::generate_static_keypair();
            let id = base64::engine::general_purpose::STANDARD.encode(public);
            one_time_prekeys.insert(id, OneTimePreKey { public, private });
        }

        let pq_identity_prekey = kem::generate_keypair(config.pq_parameter_set);
        let pq_identity_prekey_signature = sign::sign(
            &pq_prekey_message(config.pq_parameter_set, &pq_identity_prekey.public_bytes),
            &identity_signing_private,
        );

        let mut pq_one_time_prekeys = HashMap::new();
        for _ in 0..config.one_time_prekey_count {
            let kp = kem::generate_keypair(config.pq_parameter_set);
            let id = base64::engine::general_purpose::STANDARD.encode(&kp.public_bytes);
            pq_one_time_prekeys.insert(id, kp);
        }

        trace::event(Category::Session, &format!("device {} issued", device_id));

        Self {
            device_id,
            config,
            identity_signing_public,
            identity_signing_private,
            identity_agreement_public,
            identity_agreement_private,
            signed_prekey,
            one_time_prekeys: Mutex::new(one_time_prekeys),
            pq_identity_prekey,
            pq_identity_prekey_signature,
            pq_one_time_prekeys: Mutex::new(pq_one_time_prekeys),
        }
    }

    pub fn identity_signing_private(&self) -> &[u8; 32] {
        &self.identity_signing_private
    }

    pub fn identity_agreement_private(&self) -> &[u8; 32] {
        &self.identity_agreement_private
    }

    pub fn signed_prekey_private(&self) -> &[u8; 32] {
        &self.signed_prekey.private
    }

    pub fn pq_identity_prekey(&self) -> &PqKeypair {
        &self.pq_identity_prekey
    }

    /// Snapshot of current publishable material, including every one-time
    /// key of each kind that has not yet been consumed. Does not consume
    /// them — consumption happens only via [`Self::consume_one_time_key`] /
    /// [`Self::consume_pq_one_time_key`], mirroring how the prekey directory
    /// independently tracks its own public queues. Carrying the whole
    /// remaining set (rather than a single key) lets the directory stay
    /// stocked across many fetches from one `publish` call.
    pub fn publish(&self) -> PublishedBundle {
        let one_time_prekeys = self
            .one_time_prekeys
            .lock()
            .unwrap()
            .iter()
            .map(|(id, k)| (id.clone(), k.public))
            .collect();
        let pq_one_time_prekeys = self
            .pq_one_time_prekeys
            .lock()
            .unwrap()
            .iter()
            .map(|(id, k)| (id.clone(), k.public_bytes.clone()))
            .collect();

        PublishedBundle {
            device_id: self.device_id.clone(),
            identity_signing_public: self.identity_signing_public,
            identity_agreement_public: self.identity_agreement_public,
            signed_prekey_id: self.signed_prekey.id,
            signed_prekey_public: self.signed_prekey.public,
            signed_prekey_signature: self.signed_prekey.signature,
            signed_prekey_created_at: self.signed_prekey.created_at,
            one_time_prekeys,
            pq_parameter_set: self.config.pq_parameter_set,
            pq_identity_prekey_public: self.pq_identity_prekey.public_bytes.clone(),
            pq_identity_prekey_signature: self.pq_identity_prekey_signature,
            pq_one_time_prekeys,
        }
    }

    /// Consume a classical one-time prekey by id, returning its private half.
    /// Fails if the id is unknown or was already consumed.
    pub fn consume_one_time_key(&self, id: &str) -> Result<[u8; 32]> {
        let mut keys = self.one_time_prekeys.lock().unwrap();
        let key = keys
            .remove(id)
            .ok_or_else(|| DeviceError::KeyNotFound(id.to_string()))?;
        trace::event(Category::Session, &format!("consumed one-time key {}", trace::short_id(id.as_bytes())));
        Ok(key.private)
    }

    /// Consume a PQ one-time prekey by id, returning the keypair so it can
    /// decapsulate. Fails if the id is unknown or was already consumed.
    pub fn consume_pq_one_time_key(&self, id: &str) -> Result<PqKeypair> {
        let mut keys = self.pq_one_time_prekeys.lock().unwrap();
        keys.remove(id)
            .ok_or_else(|| DeviceError::KeyNotFound(id.to_string()))
    }

    pub fn decapsulate_pq_identity(&self, ct: &PqCiphertext) -> std::result::Result<Vec<u8>, kem::KemError> {
        kem::decapsulate(&self.pq_identity_prekey, ct)
    }

    pub fn new_device_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_exposes_all_one_time_keys() {
        let device = DeviceKeystore::new(
            "alice",
            DeviceConfig {
                one_time_prekey_count: 3,
                ..Default::default()
            },
        );
        let bundle = device.publish();
        assert_eq!(bundle.one_time_prekeys.len(), 3);
        assert_eq!(bundle.pq_one_time_prekeys.len(), 3);
    }

    #[test]
    fn signed_prekey_signature_verifies() {
        let device = DeviceKeystore::new("alice", DeviceConfig::default());
        let bundle = device.publish();
        let msg = signed_prekey_message(bundle.signed_prekey_id, &bundle.signed_prekey_public, &device.signed_prekey.created_at);
        assert!(sign::verify(&msg, &bundle.signed_prekey_signature, &bundle.identity_signing_public).unwrap());
    }

    #[test]
    fn one_time_key_consumed_at_most_once() {
        let device = DeviceKeystore::new("alice", DeviceConfig::default());
        let bundle = device.publish();
        let (id, _) = bundle.one_time_prekeys.into_iter().next().unwrap();

        assert!(device.consume_one_time_key(&id).is_ok());
        assert!(matches!(device.consume_one_time_key(&id), Err(DeviceError::KeyNotFound(_))));
    }

    #[test]
    fn pq_identity_prekey_signature_verifies() {
        let device = DeviceKeystore::new("alice", DeviceConfig::default());
        let bundle = device.publish();
        let msg = pq_prekey_message(bundle.pq_parameter_set, &bundle.pq_identity_prekey_public);
        assert!(sign::verify(&msg, &bundle.pq_identity_prekey_signature, &bundle.identity_signing_public).unwrap());
    }
}
