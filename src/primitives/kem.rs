//! ML-KEM (FIPS 203) wrapper, parameterized over the three standard security
//! levels. Keys and ciphertexts are carried as owned byte vectors so that the
//! rest of the crate never has to name the per-parameter-set concrete types.

use ml_kem::kem::{Decapsulate as _, Encapsulate as _};
use ml_kem::{Encoded, EncodedSizeUser, KemCore, MlKem1024, MlKem512, MlKem768};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Error, Debug)]
pub enum KemError {
    #[error("encapsulation failed")]
    EncapsulationFailed,
    #[error("decapsulation failed")]
    DecapsulationFailed,
    #[error("malformed key or ciphertext bytes")]
    Malformed,
}

pub type Result<T> = std::result::Result<T, KemError>;

/// ML-KEM security level, carried alongside every PQ public record so a peer
/// knows which parameter set to decode a key or ciphertext with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PqParameterSet {
    MlKem512,
    MlKem768,
    MlKem1024,
}

impl PqParameterSet {
    pub fn name(&self) -> &'static str {
        match self {
            PqParameterSet::MlKem512 => "ml_kem_512",
            PqParameterSet::MlKem768 => "ml_kem_768",
            PqParameterSet::MlKem1024 => "ml_kem_1024",
        }
    }
}

impl Default for PqParameterSet {
    fn default() -> Self {
        PqParameterSet::MlKem512
    }
}

/// A PQ keypair's encoded bytes, tagged with the parameter set it belongs to.
#[derive(Clone, Serialize, Deserialize)]
pub struct PqKeypair {
    pub parameter_set: PqParameterSet,
    pub public_bytes: Vec<u8>,
    secret_bytes: Vec<u8>,
}

impl Drop for PqKeypair {
    fn drop(&mut self) {
        self.secret_bytes.zeroize();
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PqCiphertext {
    pub parameter_set: PqParameterSet,
    pub bytes: Vec<u8>,
}

/// Derive a deterministic 32-byte seed expansion, mirroring the teacher's
/// domain-separated seed-to-key derivation (`derive_kyber_seed`).
fn expand_seed(seed: &[u8; 32], domain: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(domain);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

macro_rules! dispatch_generate {
    ($param:expr, $rng:expr, $variant:ident, $ty:ty) => {{
        let (dk, ek) = <$ty>::generate($rng);
        PqKeypair {
            parameter_set: PqParameterSet::$variant,
            public_bytes: ek.as_bytes().to_vec(),
            secret_bytes: dk.as_bytes().to_vec(),
        }
    }};
}

/// Generate a fresh keypair for `parameter_set` using the OS RNG.
pub fn generate_keypair(parameter_set: PqParameterSet) -> PqKeypair {
    let mut rng = OsRng;
    match parameter_set {
        PqParameterSet::MlKem512 => dispatch_generate!(parameter_set, &mut rng, MlKem512, MlKem512),
        PqParameterSet::MlKem768 => dispatch_generate!(parameter_set, &mut rng, MlKem768, MlKem768),
        PqParameterSet::MlKem1024 => {
            dispatch_generate!(parameter_set, &mut rng, MlKem1024, MlKem1024)
        }
    }
}

/// Generate a keypair deterministically from a 32-byte seed (used for
/// reproducible device-bootstrap tests, never for live device identities).
pub fn generate_keypair_from_seed(parameter_set: PqParameterSet, seed: &[u8; 32]) -> PqKeypair {
    let expanded = expand_seed(seed, b"hybrid-ratchet-core-pq-seed-v1");
    let mut rng = ChaCha20Rng::from_seed(expanded);
    match parameter_set {
        PqParameterSet::MlKem512 => dispatch_generate!(parameter_set, &mut rng, MlKem512, MlKem512),
        PqParameterSet::MlKem768 => dispatch_generate!(parameter_set, &mut rng, MlKem768, MlKem768),
        PqParameterSet::MlKem1024 => {
            dispatch_generate!(parameter_set, &mut rng, MlKem1024, MlKem1024)
        }
    }
}

macro_rules! dispatch_encapsulate {
    ($ty:ty, $bytes:expr) => {{
        let expected = Encoded::<<$ty as KemCore>::EncapsulationKey>::default().len();
        if $bytes.len() != expected {
            Err(KemError::Malformed)
        } else {
            let encoded = Encoded::<<$ty as KemCore>::EncapsulationKey>::clone_from_slice($bytes);
            let ek = <$ty as KemCore>::EncapsulationKey::from_bytes(&encoded);
            let mut rng = OsRng;
            ek.encapsulate(&mut rng)
                .map(|(ct, ss)| (ct.to_vec(), ss.to_vec()))
                .map_err(|_| KemError::EncapsulationFailed)
        }
    }};
}

/// Encapsulate to `public_key`, producing (ciphertext, 32-byte shared secret).
pub fn encapsulate(public_key: &PqKeypair) -> Result<(PqCiphertext, Vec<u8>)> {
    encapsulate_to(public_key.parameter_set, &public_key.public_bytes)
}

/// Encapsulate to a raw public-key encoding (used when only the wire-carried
/// bytes are on hand, e.g. a peer's prekey bundle). Rejects a key whose
/// length doesn't match `parameter_set` instead of panicking, since this is
/// the first place an attacker-controlled bundle reaches decode.
pub fn encapsulate_to(parameter_set: PqParameterSet, public_bytes: &[u8]) -> Result<(PqCiphertext, Vec<u8>)> {
    if public_bytes.is_empty() {
        return Err(KemError::Malformed);
    }
    let (ct_bytes, ss) = match parameter_set {
        PqParameterSet::MlKem512 => dispatch_encapsulate!(MlKem512, public_bytes)?,
        PqParameterSet::MlKem768 => dispatch_encapsulate!(MlKem768, public_bytes)?,
        PqParameterSet::MlKem1024 => dispatch_encapsulate!(MlKem1024, public_bytes)?,
    };
    Ok((
        PqCiphertext {
            parameter_set,
            bytes: ct_bytes,
        },
        ss,
    ))
}

macro_rules! dispatch_decapsulate {
    ($ty:ty, $secret_bytes:expr, $ct_bytes:expr) => {{
        let dk_expected = Encoded::<<$ty as KemCore>::DecapsulationKey>::default().len();
        let ct_expected = Encoded::<<$ty as KemCore>::Ciphertext>::default().len();
        if $secret_bytes.len() != dk_expected || $ct_bytes.len() != ct_expected {
            Err(KemError::Malformed)
        } else {
            let encoded_dk = Encoded::<<$ty as KemCore>::DecapsulationKey>::clone_from_slice($secret_bytes);
            let dk = <$ty as KemCore>::DecapsulationKey::from_bytes(&encoded_dk);
            let encoded_ct = Encoded::<<$ty as KemCore>::Ciphertext>::clone_from_slice($ct_bytes);
            dk.decapsulate(&encoded_ct)
                .map(|ss| ss.to_vec())
                .map_err(|_| KemError::DecapsulationFailed)
        }
    }};
}

/// Decapsulate `ciphertext` with `keypair`'s secret half, producing the
/// 32-byte shared secret. Fails if the parameter sets don't match, or if
/// either the secret key or the ciphertext has the wrong encoded length for
/// the parameter set — a peer-supplied ciphertext never panics the ratchet.
pub fn decapsulate(keypair: &PqKeypair, ciphertext: &PqCiphertext) -> Result<Vec<u8>> {
    if keypair.parameter_set != ciphertext.parameter_set {
        return Err(KemError::Malformed);
    }
    match keypair.parameter_set {
        PqParameterSet::MlKem512 => {
            dispatch_decapsulate!(MlKem512, &keypair.secret_bytes, &ciphertext.bytes)
        }
        PqParameterSet::MlKem768 => {
            dispatch_decapsulate!(MlKem768, &keypair.secret_bytes, &ciphertext.bytes)
        }
        PqParameterSet::MlKem1024 => {
            dispatch_decapsulate!(MlKem1024, &keypair.secret_bytes, &ciphertext.bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulate_decapsulate_round_trip_512() {
        let kp = generate_keypair(PqParameterSet::MlKem512);
        let (ct, ss_sender) = encapsulate(&kp).unwrap();
        let ss_receiver = decapsulate(&kp, &ct).unwrap();
        assert_eq!(ss_sender, ss_receiver);
    }

    #[test]
    fn encapsulate_decapsulate_round_trip_1024() {
        let kp = generate_keypair(PqParameterSet::MlKem1024);
        let (ct, ss_sender) = encapsulate(&kp).unwrap();
        let ss_receiver = decapsulate(&kp, &ct).unwrap();
        assert_eq!(ss_sender, ss_receiver);
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        let seed = [42u8; 32];
        let a = generate_keypair_from_seed(PqParameterSet::MlKem512, &seed);
        let b = generate_keypair_from_seed(PqParameterSet::MlKem512, &seed);
        assert_eq!(a.public_bytes, b.public_bytes);
    }

    #[test]
    fn mismatched_parameter_sets_are_rejected() {
        let kp = generate_keypair(PqParameterSet::MlKem512);
        let other = generate_keypair(PqParameterSet::MlKem768);
        let (ct, _) = encapsulate(&other).unwrap();
        assert!(decapsulate(&kp, &ct).is_err());
    }

    #[test]
    fn wrong_length_public_key_is_rejected_not_panicked() {
        let err = encapsulate_to(PqParameterSet::MlKem512, &[0u8; 7]).unwrap_err();
        assert!(matches!(err, KemError::Malformed));
    }

    #[test]
    fn wrong_length_ciphertext_is_rejected_not_panicked() {
        let kp = generate_keypair(PqParameterSet::MlKem512);
        let bogus_ct = PqCiphertext {
            parameter_set: PqParameterSet::MlKem512,
            bytes: vec![0u8; 3],
        };
        assert!(matches!(decapsulate(&kp, &bogus_ct), Err(KemError::Malformed)));
    }
}
