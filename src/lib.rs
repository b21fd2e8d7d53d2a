//! # Hybrid Ratchet Core
//!
//! A hybrid post-quantum/classical Double Ratchet core, in the spirit of the
//! [Signal Protocol](https://signal.org/docs/), where every ratchet epoch
//! braids a classical X25519 Diffie-Hellman step with a fresh ML-KEM
//! (FIPS 203) encapsulation, so the root key depends on both secrets at
//! every step rather than only during periodic rekeys.
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`primitives`] | X25519, Ed25519, ML-KEM, AES-256-GCM, and the KDF formulas everything else is built from |
//! | [`device`] | Per-device identity, signed prekey, and one-time prekeys |
//! | [`directory`] | In-memory prekey bundle publish/fetch with atomic one-time-key consumption |
//! | [`handshake`] | Hybrid X3DH-style initial key agreement |
//! | [`ratchet`] | The pairwise double ratchet state machine |
//! | [`senderkey`] | Per-sender symmetric chain for group messages |
//! | [`group`] | Sender-key distribution envelopes |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `debug-logs` | No | Emit `log::debug!` trace events for session/ratchet/ordering/group activity |

pub mod config;
pub mod device;
pub mod directory;
pub mod group;
pub mod handshake;
pub mod primitives;
pub mod ratchet;
pub mod senderkey;
pub mod trace;

pub use config::{DeviceConfig, RatchetConfig};
pub use device::DeviceKeystore;
pub use directory::{Bundle, PrekeyDirectory};
pub use handshake::{InitialMessage, InitiatorOutcome};
pub use ratchet::{PairwiseRatchet, RatchetMessage};
pub use senderkey::{ReceiverSenderKeyState, SenderKeyMessage, SenderKeyState};
