//! Prekey directory: holds the most recent published bundle per device and
//! serves it out, consuming at most one classical and one PQ one-time key
//! per lookup. Mirrors the teacher's pattern of guarding a shared
//! process-wide resource with a mutex held only for the duration of the
//! consume-and-remove step (`replay_cache.rs`'s `Lazy<Mutex<...>>`), except
//! the lock lives on the directory instance rather than a crate-wide static.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::device::PublishedBundle;
use crate::primitives::kem::PqParameterSet;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("device {0} has never published a bundle")]
    UnknownDevice(String),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// A bundle as served to an initiator: the same public fields as
/// [`PublishedBundle`], except the one-time keys reflect what this
/// particular lookup consumed (which may differ from what was most
/// recently published, once other lookups have drained the queues).
#[derive(Clone)]
pub struct Bundle {
    pub device_id: String,
    pub identity_signing_public: [u8; 32],
    pub identity_agreement_public: [u8; 32],
    pub signed_prekey_id: u32,
    pub signed_prekey_public: [u8; 32],
    pub signed_prekey_signature: [u8; 64],
    pub signed_prekey_created_at: DateTime<Utc>,
    pub one_time_prekey: Option<(String, [u8; 32])>,
    pub pq_parameter_set: PqParameterSet,
    pub pq_identity_prekey_public: Vec<u8>,
    pub pq_identity_prekey_signature: [u8; 64],
    pub pq_one_time_prekey: Option<(String, Vec<u8>)>,
}

struct DeviceRecord {
    identity_signing_public: [u8; 32],
    identity_agreement_public: [u8; 32],
    signed_prekey_id: u32,
    signed_prekey_public: [u8; 32],
    signed_prekey_signature: [u8; 64],
    signed_prekey_created_at: DateTime<Utc>,
    one_time_queue: VecDeque<(String, [u8; 32])>,
    pq_parameter_set: PqParameterSet,
    pq_identity_prekey_public: Vec<u8>,
    pq_identity_prekey_signature: [u8; 64],
    pq_one_time_queue: VecDeque<(String, Vec<u8>)>,
}

/// A simple in-memory prekey directory. Production deployments would back
/// this with a remote service; the interface here is the contract the
/// handshake depends on.
pub struct PrekeyDirectory {
    devices: Mutex<HashMap<String, DeviceRecord>>,
}

impl Default for PrekeyDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PrekeyDirectory {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Replace (or create) the published record for a device. Idempotent:
    /// publishing again simply overwrites identity/signed-prekey fields and
    /// enqueues any new one-time keys found in the bundle.
    pub fn publish(&self, bundle: PublishedBundle) {
        let mut devices = self.devices.lock().unwrap();
        let record = devices
            .entry(bundle.device_id.clone())
            .or_insert_with(|| DeviceRecord {
                identity_signing_public: bundle.identity_signing_public,
                identity_agreement_public: bundle.identity_agreement_public,
                signed_prekey_id: bundle.signed_prekey_id,
                signed_prekey_public: bundle.signed_prekey_public,
                signed_prekey_signature: bundle.signed_prekey_signature,
                signed_prekey_created_at: bundle.signed_prekey_created_at,
                one_time_queue: VecDeque::new(),
                pq_parameter_set: bundle.pq_parameter_set,
                pq_identity_prekey_public: bundle.pq_identity_prekey_public.clone(),
                pq_identity_prekey_signature: bundle.pq_identity_prekey_signature,
                pq_one_time_queue: VecDeque::new(),
            });

        record.identity_signing_public = bundle.identity_signing_public;
        record.identity_agreement_public = bundle.identity_agreement_public;
        record.signed_prekey_id = bundle.signed_prekey_id;
        record.signed_prekey_public = bundle.signed_prekey_public;
        record.signed_prekey_signature = bundle.signed_prekey_signature;
        record.signed_prekey_created_at = bundle.signed_prekey_created_at;
        record.pq_parameter_set = bundle.pq_parameter_set;
        record.pq_identity_prekey_public = bundle.pq_identity_prekey_public;
        record.pq_identity_prekey_signature = bundle.pq_identity_prekey_signature;

        for otp in bundle.one_time_prekeys {
            if !record.one_time_queue.iter().any(|(id, _)| id == &otp.0) {
                record.one_time_queue.push_back(otp);
            }
        }
        for otp in bundle.pq_one_time_prekeys {
            if !record.pq_one_time_queue.iter().any(|(id, _)| id == &otp.0) {
                record.pq_one_time_queue.push_back(otp);
            }
        }
    }

    /// Fetch the current bundle for `device_id`, atomically popping one
    /// classical and one PQ one-time key if any remain. Never returns the
    /// same one-time id twice.
    pub fn fetch_bundle(&self, device_id: &str) -> Result<Bundle> {
        let mut devices = self.devices.lock().unwrap();
        let record = devices
            .get_mut(device_id)
            .ok_or_else(|| DirectoryError::UnknownDevice(device_id.to_string()))?;

        Ok(Bundle {
            device_id: device_id.to_string(),
            identity_signing_public: record.identity_signing_public,
            identity_agreement_public: record.identity_agreement_public,
            signed_prekey_id: record.signed_prekey_id,
            signed_prekey_public: record.signed_prekey_public,
            signed_prekey_signature: record.signed_prekey_signature,
            signed_prekey_created_at: record.signed_prekey_created_at,
            one_time_prekey: record.one_time_queue.pop_front(),
            pq_parameter_set: record.pq_parameter_set,
            pq_identity_prekey_public: record.pq_identity_prekey_public.clone(),
            pq_identity_prekey_signature: record.pq_identity_prekey_signature,
            pq_one_time_prekey: record.pq_one_time_queue.pop_front(),
        })
    }
}
