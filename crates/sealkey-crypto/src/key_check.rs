//! Key-check values: non-secret fingerprints for wrong-key detection
//!
//! A key-check value (KCV) is a truncated HMAC of a fixed, known plaintext
//! under the derived key. It is stored server-side so that a later unlock
//! can detect a wrong passkey (different PRF output produces a different
//! key) before any data is encrypted or decrypted with the wrong key.
//!
//! The KCV reveals nothing useful about the key: recovering the key from a
//! 16-byte truncated HMAC over a public constant is equivalent to breaking
//! HMAC-SHA256.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::derive::MasterKey;

type HmacSha256 = Hmac<Sha256>;

/// Fixed plaintext that every key fingerprints.
const CHECK_PLAINTEXT: &[u8] = b"sealkey-key-check-v1";

/// Size of a stored key-check value in bytes.
pub const KCV_SIZE: usize = 16;

/// A non-secret fingerprint of a derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCheckValue(pub [u8; KCV_SIZE]);

impl KeyCheckValue {
    /// The raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; KCV_SIZE] {
        &self.0
    }
}

/// Compute the key-check value for a derived key.
///
/// Deterministic: the same key always yields the same KCV.
pub fn generate_check_value(key: &MasterKey) -> KeyCheckValue {
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
        unreachable!("HMAC accepts any key length");
    };
    mac.update(CHECK_PLAINTEXT);

    let tag = mac.finalize().into_bytes();
    let mut kcv = [0u8; KCV_SIZE];
    kcv.copy_from_slice(&tag[..KCV_SIZE]);
    KeyCheckValue(kcv)
}

/// Check a derived key against a stored key-check value.
///
/// Comparison is constant-time (delegated to the HMAC implementation's
/// truncated verify), so the stored KCV cannot be probed byte-by-byte.
///
/// Returns `false` for a wrong key; callers must refuse to proceed rather
/// than encrypt or decrypt with a key that fails this check.
pub fn validate_check_value(key: &MasterKey, stored: &KeyCheckValue) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
        unreachable!("HMAC accepts any key length");
    };
    mac.update(CHECK_PLAINTEXT);
    mac.verify_truncated_left(stored.as_bytes()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::{derive_master_key, PRF_SALT_SIZE};

    fn key_from(prf_byte: u8) -> MasterKey {
        let salt = [7u8; PRF_SALT_SIZE];
        derive_master_key(&[prf_byte; 32], &salt, 1).unwrap()
    }

    #[test]
    fn generate_is_deterministic() {
        let key = key_from(0x11);
        assert_eq!(generate_check_value(&key), generate_check_value(&key));
    }

    #[test]
    fn validate_accepts_matching_key() {
        let key = key_from(0x11);
        let kcv = generate_check_value(&key);
        assert!(validate_check_value(&key, &kcv));
    }

    #[test]
    fn validate_rejects_different_key() {
        // The wrong-passkey scenario: a different PRF output derives a
        // different key, which must fail against the stored KCV.
        let right = key_from(0x11);
        let wrong = key_from(0x22);

        let stored = generate_check_value(&right);
        assert!(!validate_check_value(&wrong, &stored));
    }

    #[test]
    fn validate_rejects_corrupted_kcv() {
        let key = key_from(0x11);
        let mut kcv = generate_check_value(&key);
        kcv.0[0] ^= 0x01;
        assert!(!validate_check_value(&key, &kcv));
    }

    #[test]
    fn kcv_round_trips_through_serde() {
        let key = key_from(0x33);
        let kcv = generate_check_value(&key);

        let json = serde_json::to_string(&kcv).unwrap();
        let back: KeyCheckValue = serde_json::from_str(&json).unwrap();
        assert_eq!(kcv, back);
    }
}
