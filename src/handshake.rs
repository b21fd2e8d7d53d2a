//! Hybrid X3DH-style handshake: four classical DH shares plus one ML-KEM
//! encapsulation, combined with HKDF-SHA256 into the pairwise ratchet's
//! initial root key.

use thiserror::Error;

use crate::device::{self, DeviceKeystore};
use crate::directory::Bundle;
use crate::primitives::kem::{self, PqCiphertext, PqKeypair, PqParameterSet};
use crate::primitives::{dh, kdf, sign};
use crate::trace::{self, Category};

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("peer's signed prekey signature does not verify")]
    InvalidSignedPreKeySignature,
    #[error("peer's PQ prekey signature does not verify")]
    InvalidPqPreKeySignature,
    #[error("expected one-time key was already consumed")]
    MissingOneTimeKey,
    #[error("PQ decapsulation failed")]
    PqDecapsulationFailed,
    #[error(transparent)]
    Device(#[from] device::DeviceError),
    #[error(transparent)]
    Kem(#[from] kem::KemError),
}

pub type Result<T> = std::result::Result<T, HandshakeError>;

/// What the initiator sends the responder out-of-band alongside the first
/// ratchet message, so the responder can reconstruct the same root key.
#[derive(Clone)]
pub struct InitialMessage {
    pub initiator_device_id: String,
    pub initiator_identity_agreement_public: [u8; 32],
    pub ephemeral_public: [u8; 32],
    pub used_one_time_key_id: Option<String>,
    pub pq_parameter_set: PqParameterSet,
    pub pq_ciphertext: PqCiphertext,
    pub used_pq_one_time_key_id: Option<String>,
}

pub struct InitiatorOutcome {
    pub root_key: [u8; 32],
    /// The X3DH ephemeral's private half. Never transmitted; the caller
    /// needs it to seed the pairwise ratchet's initial sending keypair.
    pub ephemeral_private: [u8; 32],
    pub initial_message: InitialMessage,
}

pub struct ResponderOutcome {
    pub root_key: [u8; 32],
    /// Whichever PQ prekey was consumed to decapsulate `pq_ciphertext`
    /// (one-time or identity); the caller seeds the pairwise ratchet's
    /// initial PQ keypair with it.
    pub pq_prekey_used: PqKeypair,
}

fn verify_bundle_signatures(bundle: &Bundle) -> Result<()> {
    let spk_message = device::signed_prekey_message(
        bundle.signed_prekey_id,
        &bundle.signed_prekey_public,
        &bundle.signed_prekey_created_at,
    );
    if !sign::verify(
        &spk_message,
        &bundle.signed_prekey_signature,
        &bundle.identity_signing_public,
    )
    .map_err(|_| HandshakeError::InvalidSignedPreKeySignature)?
    {
        return Err(HandshakeError::InvalidSignedPreKeySignature);
    }

    let pq_message = device::pq_prekey_message(bundle.pq_parameter_set, &bundle.pq_identity_prekey_public);
    if !sign::verify(
        &pq_message,
        &bundle.pq_identity_prekey_signature,
        &bundle.identity_signing_public,
    )
    .map_err(|_| HandshakeError::InvalidPqPreKeySignature)?
    {
        return Err(HandshakeError::InvalidPqPreKeySignature);
    }

    Ok(())
}

/// Run the initiator side of the handshake against a fetched bundle.
/// `initiator` is the local device's own keystore (for its long-term
/// identity-agreement private key).
pub fn initiate(initiator: &DeviceKeystore, bundle: &Bundle) -> Result<InitiatorOutcome> {
    verify_bundle_signatures(bundle)?;

    // EK_A needs to feed three separate DH computations (DH2, DH3, DH4), so
    // unlike a true single-use `EphemeralSecret` we generate it as a
    // static-secret scalar that is simply discarded once this function
    // returns — it is never persisted or reused across handshakes.
    let (ephemeral_public, ephemeral_private) = dh::generate_static_keypair();

    // DH1 = DH(IK_A, SPK_B); DH2 = DH(EK_A, IK_B); DH3 = DH(EK_A, SPK_B);
    // DH4 = DH(EK_A, OPK_B) if an OPK was served.
    let dh1 = dh::dh(initiator.identity_agreement_private(), &bundle.signed_prekey_public);
    let dh2 = dh::dh(&ephemeral_private, &bundle.identity_agreement_public);
    let dh3 = dh::dh(&ephemeral_private, &bundle.signed_prekey_public);

    let mut classical_ikm = Vec::with_capacity(32 * 4);
    classical_ikm.extend_from_slice(&dh1);
    classical_ikm.extend_from_slice(&dh2);
    classical_ikm.extend_from_slice(&dh3);

    let used_one_time_key_id = if let Some((id, opk_public)) = &bundle.one_time_prekey {
        let dh4 = dh::dh(&ephemeral_private, opk_public);
        classical_ikm.extend_from_slice(&dh4);
        Some(id.clone())
    } else {
        None
    };

    // Prefer a one-time PQ prekey over the identity PQ prekey, same
    // preference order as the classical OPK above.
    let (pq_ciphertext, pq_shared_secret, used_pq_one_time_key_id) =
        if let Some((id, pq_public)) = &bundle.pq_one_time_prekey {
            let (ct, ss) = kem::encapsulate_to(bundle.pq_parameter_set, pq_public)?;
            (ct, ss, Some(id.clone()))
        } else {
            let (ct, ss) = kem::encapsulate_to(bundle.pq_parameter_set, &bundle.pq_identity_prekey_public)?;
            (ct, ss, None)
        };

    let mut hybrid_ikm = classical_ikm;
    hybrid_ikm.extend_from_slice(&pq_shared_secret);
    let root_key = kdf::derive_x3dh_secret(&hybrid_ikm).map_err(|_| HandshakeError::PqDecapsulationFailed)?;

    trace::event(Category::Session, &format!("initiator handshake toward {} complete", bundle.device_id));

    Ok(InitiatorOutcome {
        root_key,
        ephemeral_private,
        initial_message: InitialMessage {
            initiator_device_id: initiator.device_id.clone(),
            initiator_identity_agreement_public: dh::derive_public_key(initiator.identity_agreement_private()),
            ephemeral_public,
            used_one_time_key_id,
            pq_parameter_set: bundle.pq_parameter_set,
            pq_ciphertext,
            used_pq_one_time_key_id,
        },
    })
}

/// Run the responder side of the handshake. `responder` is the local
/// device's own keystore; `message` is what the initiator sent alongside
/// the first ratchet message.
pub fn respond(responder: &DeviceKeystore, message: &InitialMessage) -> Result<ResponderOutcome> {
    // DH1 = DH(SPK_B, IK_A); DH2 = DH(IK_B, EK_A); DH3 = DH(SPK_B, EK_A);
    // DH4 = DH(OPK_B, EK_A) if the initiator consumed one.
    let dh1 = dh::dh(responder.signed_prekey_private(), &message.initiator_identity_agreement_public);
    let dh2 = dh::dh(responder.identity_agreement_private(), &message.ephemeral_public);
    let dh3 = dh::dh(responder.signed_prekey_private(), &message.ephemeral_public);

    let mut classical_ikm = Vec::with_capacity(32 * 4);
    classical_ikm.extend_from_slice(&dh1);
    classical_ikm.extend_from_slice(&dh2);
    classical_ikm.extend_from_slice(&dh3);

    if let Some(id) = &message.used_one_time_key_id {
        let opk_private = responder
            .consume_one_time_key(id)
            .map_err(|_| HandshakeError::MissingOneTimeKey)?;
        let dh4 = dh::dh(&opk_private, &message.ephemeral_public);
        classical_ikm.extend_from_slice(&dh4);
    }

    let (pq_shared_secret, pq_prekey_used) = if let Some(id) = &message.used_pq_one_time_key_id {
        let pq_keypair = responder
            .consume_pq_one_time_key(id)
            .map_err(|_| HandshakeError::MissingOneTimeKey)?;
        let ss = kem::decapsulate(&pq_keypair, &message.pq_ciphertext)
            .map_err(|_| HandshakeError::PqDecapsulationFailed)?;
        (ss, pq_keypair)
    } else {
        let ss = responder
            .decapsulate_pq_identity(&message.pq_ciphertext)
            .map_err(|_| HandshakeError::PqDecapsulationFailed)?;
        (ss, responder.pq_identity_prekey().clone())
    };

    let mut hybrid_ikm = classical_ikm;
    hybrid_ikm.extend_from_slice(&pq_shared_secret);
    let root_key = kdf::derive_x3dh_secret(&hybrid_ikm).map_err(|_| HandshakeError::PqDecapsulationFailed)?;

    trace::event(Category::Session, &format!("responder handshake from {} complete", message.initiator_device_id));

    Ok(ResponderOutcome {
        root_key,
        pq_prekey_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::directory::PrekeyDirectory;

    #[test]
    fn both_sides_agree_on_root_key() {
        let alice = DeviceKeystore::new("alice", DeviceConfig::default());
        let bob = DeviceKeystore::new("bob", DeviceConfig::default());

        let directory = PrekeyDirectory::new();
        directory.publish(bob.publish());

        let bundle = directory.fetch_bundle("bob").unwrap();
        let outcome = initiate(&alice, &bundle).unwrap();
        let responded = respond(&bob, &outcome.initial_message).unwrap();

        assert_eq!(outcome.root_key, responded.root_key);
    }

    #[test]
    fn works_without_one_time_keys() {
        let alice = DeviceKeystore::new("alice", DeviceConfig::default());
        let bob = DeviceKeystore::new(
            "bob",
            DeviceConfig {
                one_time_prekey_count: 0,
                ..Default::default()
            },
        );

        let directory = PrekeyDirectory::new();
        directory.publish(bob.publish());
        let bundle = directory.fetch_bundle("bob").unwrap();

        let outcome = initiate(&alice, &bundle).unwrap();
        let responded = respond(&bob, &outcome.initial_message).unwrap();
        assert_eq!(outcome.root_key, responded.root_key);
    }

    #[test]
    fn tampered_pq_signature_is_rejected() {
        let bob = DeviceKeystore::new("bob", DeviceConfig::default());
        let directory = PrekeyDirectory::new();
        directory.publish(bob.publish());

        let mut bundle = directory.fetch_bundle("bob").unwrap();
        bundle.pq_identity_prekey_signature[0] ^= 0x01;

        let alice = DeviceKeystore::new("alice", DeviceConfig::default());
        assert!(matches!(
            initiate(&alice, &bundle),
            Err(HandshakeError::InvalidPqPreKeySignature)
        ));
    }

    #[test]
    fn tampered_signed_prekey_signature_is_rejected() {
        let bob = DeviceKeystore::new("bob", DeviceConfig::default());
        let directory = PrekeyDirectory::new();
        directory.publish(bob.publish());

        let mut bundle = directory.fetch_bundle("bob").unwrap();
        bundle.signed_prekey_signature[0] ^= 0x01;

        let alice = DeviceKeystore::new("alice", DeviceConfig::default());
        assert!(matches!(
            initiate(&alice, &bundle),
            Err(HandshakeError::InvalidSignedPreKeySignature)
        ));
    }
}
