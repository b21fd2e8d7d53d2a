//! End-to-end wiring tests: handshake output feeding a pairwise ratchet, and
//! the sender-key group flow, exercising the scenarios a unit test confined
//! to one module can't reach on its own.

use hybrid_ratchet_core::config::{DeviceConfig, RatchetConfig};
use hybrid_ratchet_core::device::DeviceKeystore;
use hybrid_ratchet_core::directory::{Bundle, PrekeyDirectory};
use hybrid_ratchet_core::group;
use hybrid_ratchet_core::handshake::{self, ResponderOutcome};
use hybrid_ratchet_core::primitives::kem;
use hybrid_ratchet_core::ratchet::PairwiseRatchet;
use hybrid_ratchet_core::senderkey::SenderKeyState;
use hybrid_ratchet_core::InitiatorOutcome;

fn remote_pq_target(bundle: &Bundle) -> Vec<u8> {
    bundle
        .pq_one_time_prekey
        .as_ref()
        .map(|(_, bytes)| bytes.clone())
        .unwrap_or_else(|| bundle.pq_identity_prekey_public.clone())
}

fn wire_ratchets(
    bob: &DeviceKeystore,
    bundle: &Bundle,
    outcome: &InitiatorOutcome,
    responded: &ResponderOutcome,
) -> (PairwiseRatchet, PairwiseRatchet) {
    let alice_pq_ratchet_keypair = kem::generate_keypair(bundle.pq_parameter_set);
    let remote_pq_public = remote_pq_target(bundle);

    let alice_ratchet = PairwiseRatchet::new_initiator(
        RatchetConfig::default(),
        outcome.root_key,
        outcome.initial_message.ephemeral_public,
        outcome.ephemeral_private,
        bundle.signed_prekey_public,
        bundle.pq_parameter_set,
        alice_pq_ratchet_keypair,
        remote_pq_public,
    );

    let bob_ratchet = PairwiseRatchet::new_responder(
        RatchetConfig::default(),
        responded.root_key,
        bundle.signed_prekey_public,
        *bob.signed_prekey_private(),
        bundle.pq_parameter_set,
        responded.pq_prekey_used.clone(),
    );

    (alice_ratchet, bob_ratchet)
}

// Scenario S1, wired through the full handshake rather than hand-built state.
#[test]
fn handshake_then_ordered_ratchet_conversation() {
    let alice = DeviceKeystore::new("alice", DeviceConfig::default());
    let bob = DeviceKeystore::new("bob", DeviceConfig::default());

    let directory = PrekeyDirectory::new();
    directory.publish(bob.publish());
    let bundle = directory.fetch_bundle("bob").unwrap();

    let outcome = handshake::initiate(&alice, &bundle).unwrap();
    let responded = handshake::respond(&bob, &outcome.initial_message).unwrap();
    assert_eq!(outcome.root_key, responded.root_key);

    let (mut alice_ratchet, mut bob_ratchet) = wire_ratchets(&bob, &bundle, &outcome, &responded);

    let m1 = alice_ratchet.encrypt(b"Hi Bob!").unwrap();
    assert_eq!(bob_ratchet.decrypt(&m1).unwrap(), b"Hi Bob!");

    let m2 = bob_ratchet.encrypt(b"Hi Alice! Got your message.").unwrap();
    assert_eq!(alice_ratchet.decrypt(&m2).unwrap(), b"Hi Alice! Got your message.");

    let m3 = alice_ratchet.encrypt(b"Great!").unwrap();
    assert_eq!(bob_ratchet.decrypt(&m3).unwrap(), b"Great!");
}

// Scenario S6: exhausted one-time prekeys still produce a working session.
#[test]
fn handshake_survives_exhausted_one_time_prekeys_and_messages_round_trip() {
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
    assert!(bundle.one_time_prekey.is_none());
    assert!(bundle.pq_one_time_prekey.is_none());

    let outcome = handshake::initiate(&alice, &bundle).unwrap();
    assert!(outcome.initial_message.used_one_time_key_id.is_none());
    assert!(outcome.initial_message.used_pq_one_time_key_id.is_none());

    let responded = handshake::respond(&bob, &outcome.initial_message).unwrap();
    assert_eq!(outcome.root_key, responded.root_key);

    let (mut alice_ratchet, mut bob_ratchet) = wire_ratchets(&bob, &bundle, &outcome, &responded);

    let message = alice_ratchet.encrypt(b"still works without one-time keys").unwrap();
    assert_eq!(
        bob_ratchet.decrypt(&message).unwrap(),
        b"still works without one-time keys"
    );
}

// Property 6: two independent handshakes against the same device never reuse
// a one-time key id, classical or PQ.
#[test]
fn distinct_handshakes_never_reuse_one_time_keys() {
    let bob = DeviceKeystore::new(
        "bob",
        DeviceConfig {
            one_time_prekey_count: 2,
            ..Default::default()
        },
    );
    let directory = PrekeyDirectory::new();
    directory.publish(bob.publish());

    let alice1 = DeviceKeystore::new("alice1", DeviceConfig::default());
    let alice2 = DeviceKeystore::new("alice2", DeviceConfig::default());

    let bundle1 = directory.fetch_bundle("bob").unwrap();
    let bundle2 = directory.fetch_bundle("bob").unwrap();

    let outcome1 = handshake::initiate(&alice1, &bundle1).unwrap();
    let outcome2 = handshake::initiate(&alice2, &bundle2).unwrap();

    let otk1 = outcome1.initial_message.used_one_time_key_id.clone().unwrap();
    let otk2 = outcome2.initial_message.used_one_time_key_id.clone().unwrap();
    assert_ne!(otk1, otk2);

    let pq_otk1 = outcome1.initial_message.used_pq_one_time_key_id.clone().unwrap();
    let pq_otk2 = outcome2.initial_message.used_pq_one_time_key_id.clone().unwrap();
    assert_ne!(pq_otk1, pq_otk2);

    // Both still derive root keys their respective responders agree with.
    let responded1 = handshake::respond(&bob, &outcome1.initial_message).unwrap();
    let responded2 = handshake::respond(&bob, &outcome2.initial_message).unwrap();
    assert_eq!(outcome1.root_key, responded1.root_key);
    assert_eq!(outcome2.root_key, responded2.root_key);
}

// Scenario S7: group send/receive, distributed through the skdist: envelope,
// delivered out of order.
#[test]
fn group_distribution_then_out_of_order_delivery() {
    let mut alice_group = SenderKeyState::new("group-42", "alice");
    let envelope = group::distribute(&alice_group);

    let mut bob_view = group::install(&envelope, RatchetConfig::default()).unwrap();

    let m1 = alice_group.encrypt(b"one");
    let m2 = alice_group.encrypt(b"two");
    let m3 = alice_group.encrypt(b"three");

    assert_eq!(bob_view.decrypt(&m3).unwrap(), b"three");
    assert_eq!(bob_view.decrypt(&m1).unwrap(), b"one");
    assert_eq!(bob_view.decrypt(&m2).unwrap(), b"two");
}
