//! Key-derivation formulas: the per-message chain KDF and the two root KDFs
//! (classical-only and hybrid classical+PQ), plus the handshake's final
//! secret derivation.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Error, Debug)]
pub enum KdfError {
    #[error("hkdf expand failed: requested length out of range")]
    ExpandFailed,
}

pub type Result<T> = std::result::Result<T, KdfError>;

type HmacSha256 = Hmac<Sha256>;

/// `KDF_CK(ck) = (HMAC(ck, 0x01), HMAC(ck, 0x02))`, returning (message key, next
/// chain key). The chain key is consumed; callers overwrite their copy with the
/// returned next key.
pub fn kdf_chain(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let message_key = hmac_one_byte(chain_key, 0x01);
    let next_chain_key = hmac_one_byte(chain_key, 0x02);
    (message_key, next_chain_key)
}

fn hmac_one_byte(key: &[u8; 32], tag: u8) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&[tag]);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// `KDF_RK_classical(rk, dh) = HKDF-SHA256(ikm=dh, salt=rk, info="Signal-Root", L=64)`,
/// split into (new root key, chain key).
pub fn kdf_root_classical(root_key: &[u8; 32], dh_output: &[u8; 32]) -> Result<([u8; 32], [u8; 32])> {
    hkdf_split_64(dh_output, Some(root_key), b"Signal-Root")
}

/// `KDF_RK_hybrid(rk, dh, pq) = HKDF-SHA256(ikm=rk‖dh‖pq, salt=∅, info="Signal-Braid-Root", L=64)`,
/// split into (new root key, chain key). Binding both the classical DH output
/// and the PQ shared secret into the same derivation means the resulting root
/// stays secret as long as either component does.
pub fn kdf_root_hybrid(
    root_key: &[u8; 32],
    dh_output: &[u8; 32],
    pq_shared_secret: &[u8],
) -> Result<([u8; 32], [u8; 32])> {
    let mut ikm = Vec::with_capacity(32 + 32 + pq_shared_secret.len());
    ikm.extend_from_slice(root_key);
    ikm.extend_from_slice(dh_output);
    ikm.extend_from_slice(pq_shared_secret);
    let result = hkdf_split_64(&ikm, None, b"Signal-Braid-Root");
    ikm.zeroize();
    result
}

/// `DeriveX3DHSecret(ikm) = HKDF-SHA256(ikm, salt=0^32, info="X3DH", L=32)`.
pub fn derive_x3dh_secret(ikm: &[u8]) -> Result<[u8; 32]> {
    let salt = [0u8; 32];
    let hk = Hkdf::<Sha256>::new(Some(&salt), ikm);
    let mut out = [0u8; 32];
    hk.expand(b"X3DH", &mut out).map_err(|_| KdfError::ExpandFailed)?;
    Ok(out)
}

fn hkdf_split_64(ikm: &[u8], salt: Option<&[u8; 32]>, info: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    let hk = Hkdf::<Sha256>::new(salt.map(|s| s.as_slice()), ikm);
    let mut out = [0u8; 64];
    hk.expand(info, &mut out).map_err(|_| KdfError::ExpandFailed)?;
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    a.copy_from_slice(&out[..32]);
    b.copy_from_slice(&out[32..]);
    out.zeroize();
    Ok((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_chain_is_deterministic_and_advances() {
        let ck = [7u8; 32];
        let (mk1, ck1) = kdf_chain(&ck);
        let (mk2, ck2) = kdf_chain(&ck);
        assert_eq!(mk1, mk2);
        assert_eq!(ck1, ck2);

        let (mk3, _) = kdf_chain(&ck1);
        assert_ne!(mk1, mk3);
    }

    #[test]
    fn root_kdfs_are_deterministic() {
        let rk = [1u8; 32];
        let dh = [2u8; 32];
        let (a1, b1) = kdf_root_classical(&rk, &dh).unwrap();
        let (a2, b2) = kdf_root_classical(&rk, &dh).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);

        let pq = [3u8; 64];
        let (h1, c1) = kdf_root_hybrid(&rk, &dh, &pq).unwrap();
        let (h2, c2) = kdf_root_hybrid(&rk, &dh, &pq).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(c1, c2);
        assert_ne!(h1, a1);
    }

    #[test]
    fn x3dh_secret_is_deterministic() {
        let ikm = b"some concatenated dh shares";
        assert_eq!(derive_x3dh_secret(ikm).unwrap(), derive_x3dh_secret(ikm).unwrap());
    }
}
