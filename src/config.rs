//! Tunables for the ratchet and device layers. Generalizes the teacher's bare
//! constants (`KEM_RATCHET_INTERVAL`, `MAX_SKIP`) into constructible structs so
//! tests can override the caps to exercise eviction deterministically.

use crate::primitives::kem::PqParameterSet;
use serde::{Deserialize, Serialize};

/// Per-pairwise-session and per-sender-key-chain tunables.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RatchetConfig {
    /// Maximum concurrent skipped message keys per pairwise chain.
    pub skipped_key_cap: usize,
    /// Maximum concurrent skipped message keys per sender-key chain.
    pub group_skipped_key_cap: usize,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            skipped_key_cap: 50,
            group_skipped_key_cap: 50,
        }
    }
}

/// Tunables fixed at device-creation time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub pq_parameter_set: PqParameterSet,
    pub one_time_prekey_count: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            pq_parameter_set: PqParameterSet::default(),
            one_time_prekey_count: 10,
        }
    }
}
