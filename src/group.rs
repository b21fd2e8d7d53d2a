//! Group key distribution: wraps a sender-key introduction in a tagged
//! envelope sent through an existing pairwise channel, and installs the
//! corresponding receiver state on arrival.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RatchetConfig;
use crate::senderkey::{ReceiverSenderKeyState, SenderKeyState};
use crate::trace::{self, Category};

const DISTRIBUTION_TAG: &str = "skdist:";

#[derive(Error, Debug)]
pub enum GroupError {
    #[error("envelope is missing the skdist: tag")]
    MissingTag,
    #[error("malformed sender-key distribution body: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GroupError>;

#[derive(Serialize, Deserialize)]
struct DistributionBody {
    group_id: String,
    sender_id: String,
    signing_public: [u8; 32],
    chain_key: [u8; 32],
}

/// Build the `skdist:`-tagged envelope introducing `state` to a new group
/// member. The envelope is plaintext JSON; callers are expected to send it
/// through an already-authenticated pairwise ratchet, which supplies
/// confidentiality and integrity.
pub fn distribute(state: &SenderKeyState) -> String {
    let body = DistributionBody {
        group_id: state.group_id.clone(),
        sender_id: state.sender_id.clone(),
        signing_public: state.signing_public(),
        chain_key: state.chain_key(),
    };
    let payload = serde_json::to_string(&body).expect("distribution body is always serializable");
    trace::event(Category::Group, &format!("distributed sender key for {}/{}", state.group_id, state.sender_id));
    format!("{DISTRIBUTION_TAG}{payload}")
}

/// Parse a `skdist:`-tagged envelope and install the resulting receiver
/// state, ready to decrypt messages from that sender's chain.
pub fn install(envelope: &str, config: RatchetConfig) -> Result<ReceiverSenderKeyState> {
    let body = envelope.strip_prefix(DISTRIBUTION_TAG).ok_or(GroupError::MissingTag)?;
    let parsed: DistributionBody = serde_json::from_str(body)?;

    Ok(ReceiverSenderKeyState::new(
        parsed.group_id,
        parsed.sender_id,
        parsed.signing_public,
        parsed.chain_key,
        config,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribute_then_install_round_trips_a_message() {
        let mut sender = SenderKeyState::new("group-9", "alice");
        let envelope = distribute(&sender);
        assert!(envelope.starts_with(DISTRIBUTION_TAG));

        let mut receiver = install(&envelope, RatchetConfig::default()).unwrap();
        let message = sender.encrypt(b"welcome to the group");
        assert_eq!(receiver.decrypt(&message).unwrap(), b"welcome to the group");
    }

    #[test]
    fn missing_tag_is_rejected() {
        assert!(matches!(install("not-tagged", RatchetConfig::default()), Err(GroupError::MissingTag)));
    }

    #[test]
    fn malformed_body_is_rejected() {
        let envelope = format!("{DISTRIBUTION_TAG}not json");
        assert!(matches!(install(&envelope, RatchetConfig::default()), Err(GroupError::Malformed(_))));
    }
}
