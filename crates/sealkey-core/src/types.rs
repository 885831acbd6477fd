//! Domain records: credentials, key-derivation parameters, challenges.
//!
//! These are the persisted shapes. Credentials and derivation parameters
//! live in the server's credential store (CBOR-encoded); challenges live
//! only inside sealed client-held tokens and are never persisted
//! server-side.

use std::collections::BTreeSet;

use sealkey_crypto::{KeyCheckValue, PRF_SALT_SIZE};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of random bytes in a freshly issued challenge.
pub const CHALLENGE_SIZE: usize = 32;

/// A registered passkey credential.
///
/// Owned exclusively by one identity. The signature counter and
/// `last_used_at` are mutated only through verified ceremonies; everything
/// else is written once at enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque credential id chosen by the authenticator. Unique across all
    /// owners.
    pub credential_id: Vec<u8>,
    /// Identity this credential belongs to.
    pub owner_id: Uuid,
    /// COSE_Key-encoded public key (ES256 or Ed25519).
    pub public_key: Vec<u8>,
    /// Monotonically increasing signature counter. A non-increasing value
    /// in a ceremony signals a cloned authenticator.
    pub signature_counter: u32,
    /// Transports reported at enrollment (`usb`, `nfc`, `internal`, ...).
    pub transports: BTreeSet<String>,
    /// Unix seconds when the credential was enrolled.
    pub created_at_secs: u64,
    /// Unix seconds of the last successful ceremony.
    pub last_used_at_secs: u64,
}

/// Per-owner key-derivation parameters (1:1 with the identity).
///
/// Created at first successful key setup. The salt and credential binding
/// are immutable; `version` changes only on key rotation, and
/// `key_check_value` is backfilled once on the first unlock after setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    /// Identity these parameters belong to.
    pub owner_id: Uuid,
    /// Non-secret HKDF salt, fixed length.
    pub prf_salt: [u8; PRF_SALT_SIZE],
    /// Credential whose PRF output feeds the derivation.
    pub credential_id: Vec<u8>,
    /// Derivation version; old envelopes keep decrypting under their
    /// recorded version after a rotation.
    pub version: u8,
    /// Fingerprint of the canonical derived key. `None` until the first
    /// unlock after setup backfills it.
    pub key_check_value: Option<KeyCheckValue>,
}

/// An ephemeral authentication challenge.
///
/// Lives only inside a short-TTL sealed token held by the client. Single
/// use: consumed on the first verification attempt regardless of outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Fresh random challenge bytes (at least 16; we issue 32).
    pub challenge: Vec<u8>,
    /// Owner hint when the flow already knows who is authenticating.
    pub owner_id: Option<Uuid>,
    /// Unix seconds at issuance; the token is valid for exactly five
    /// minutes from here.
    pub issued_at_secs: u64,
    /// Where to send the user after a successful ceremony.
    pub redirect_hint: Option<String>,
    /// Salt hint so the client can request the PRF extension in the same
    /// ceremony instead of a second round trip.
    pub prf_salt_hint: Option<[u8; PRF_SALT_SIZE]>,
}

impl Challenge {
    /// Whether this challenge is past its TTL at the given wall-clock time.
    ///
    /// Clock skew between issuance and validation is tolerated in one
    /// direction only: a challenge "issued in the future" is expired.
    pub fn is_expired(&self, now_secs: u64, ttl_secs: u64) -> bool {
        let Some(age) = now_secs.checked_sub(self.issued_at_secs) else {
            return true;
        };
        age > ttl_secs
    }
}
