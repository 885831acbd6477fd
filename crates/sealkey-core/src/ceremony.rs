//! Assertion verification for passkey ceremonies.
//!
//! Reconstructs the signed data from an assertion's client data and
//! authenticator data, then checks, in order: client-data shape, byte-exact
//! challenge equality, origin allow-list membership, relying-party id hash,
//! user presence, the cryptographic signature, and finally the signature
//! counter. The counter check runs only after the signature verifies: a
//! non-increasing counter from a correctly signed assertion is precisely
//! the cloned-authenticator signal.
//!
//! The verifier is pure. Persisting the new counter atomically (and failing
//! the ceremony when that persist fails) is the storage layer's job.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{
    cose::{CosePublicKey, decode_cose_key},
    error::{CeremonyError, CoseError},
    types::{Challenge, Credential},
};

/// Minimum authenticator data length: rpIdHash(32) + flags(1) + counter(4).
const MIN_AUTH_DATA_LEN: usize = 37;

/// Flags byte: user presence.
const FLAG_UP: u8 = 0x01;
/// Flags byte: user verification.
const FLAG_UV: u8 = 0x04;

/// The client's answer to an authentication challenge.
///
/// Field contents mirror what the browser ceremony returns; all four are
/// untrusted bytes until `verify_assertion` accepts them.
#[derive(Debug, Clone)]
pub struct AssertionResponse {
    /// Credential id the client claims to have used.
    pub credential_id: Vec<u8>,
    /// Raw client data JSON (signed indirectly via its hash).
    pub client_data_json: Vec<u8>,
    /// Raw authenticator data (rpIdHash, flags, counter, extensions).
    pub authenticator_data: Vec<u8>,
    /// Signature over `authenticator_data || SHA-256(client_data_json)`.
    /// DER for ES256, raw 64 bytes for Ed25519.
    pub signature: Vec<u8>,
}

/// Outcome of a successful verification.
///
/// The caller MUST persist `new_counter` and `last_used_at` atomically
/// before issuing any session; if that write fails, the ceremony fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedAssertion {
    /// Counter value to persist (strictly greater than the stored one,
    /// unless both are zero for counter-less authenticators).
    pub new_counter: u32,
    /// Whether the authenticator reported user verification (biometric or
    /// PIN), beyond mere presence.
    pub user_verified: bool,
}

/// Client data JSON as the browser serializes it. Extra members are
/// explicitly permitted by the ceremony format and ignored here.
#[derive(Deserialize)]
struct CollectedClientData {
    #[serde(rename = "type")]
    ceremony_type: String,
    challenge: String,
    origin: String,
}

/// Verify a signed assertion against the stored challenge and credential.
///
/// `expected_origins` is an exact-match allow-list, never a substring or
/// suffix match. `expected_rp_id` is the relying-party identifier whose
/// SHA-256 the authenticator data must carry.
///
/// # Errors
///
/// Every failure mode is a distinct [`CeremonyError`] for internal logging;
/// callers collapse them to a generic message externally.
pub fn verify_assertion(
    assertion: &AssertionResponse,
    stored_challenge: &Challenge,
    credential: &Credential,
    expected_origins: &[String],
    expected_rp_id: &str,
) -> Result<VerifiedAssertion, CeremonyError> {
    // 1. Client data shape. Reject before touching any cryptography.
    let client_data: CollectedClientData = serde_json::from_slice(&assertion.client_data_json)
        .map_err(|e| CeremonyError::MalformedAssertion { reason: format!("client data: {e}") })?;

    if client_data.ceremony_type != "webauthn.get" {
        return Err(CeremonyError::MalformedAssertion {
            reason: format!("unexpected ceremony type {:?}", client_data.ceremony_type),
        });
    }

    // 2. Byte-exact challenge equality.
    let presented = URL_SAFE_NO_PAD
        .decode(&client_data.challenge)
        .map_err(|_| CeremonyError::ChallengeMismatch)?;
    if presented != stored_challenge.challenge {
        return Err(CeremonyError::ChallengeMismatch);
    }

    // 3. Origin allow-list, exact match only.
    if !expected_origins.iter().any(|o| o == &client_data.origin) {
        return Err(CeremonyError::OriginMismatch { origin: client_data.origin });
    }

    // 4. Authenticator data: rpIdHash, flags, counter.
    let auth = parse_authenticator_data(&assertion.authenticator_data)?;

    let expected_hash: [u8; 32] = Sha256::digest(expected_rp_id.as_bytes()).into();
    if auth.rp_id_hash != expected_hash {
        return Err(CeremonyError::PartyMismatch);
    }

    if auth.flags & FLAG_UP == 0 {
        return Err(CeremonyError::UserPresenceMissing);
    }

    // 5. Signature over authData || SHA-256(clientDataJSON).
    let client_data_hash: [u8; 32] = Sha256::digest(&assertion.client_data_json).into();
    let mut signed_data =
        Vec::with_capacity(assertion.authenticator_data.len() + client_data_hash.len());
    signed_data.extend_from_slice(&assertion.authenticator_data);
    signed_data.extend_from_slice(&client_data_hash);

    verify_signature(&credential.public_key, &signed_data, &assertion.signature)?;

    // 6. Counter rule, only after the signature checked out.
    check_counter(credential.signature_counter, auth.counter)?;

    Ok(VerifiedAssertion { new_counter: auth.counter, user_verified: auth.flags & FLAG_UV != 0 })
}

struct ParsedAuthData {
    rp_id_hash: [u8; 32],
    flags: u8,
    counter: u32,
}

fn parse_authenticator_data(data: &[u8]) -> Result<ParsedAuthData, CeremonyError> {
    if data.len() < MIN_AUTH_DATA_LEN {
        return Err(CeremonyError::MalformedAssertion {
            reason: format!("authenticator data too short: {} bytes", data.len()),
        });
    }

    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&data[0..32]);

    let flags = data[32];

    let mut counter_bytes = [0u8; 4];
    counter_bytes.copy_from_slice(&data[33..37]);
    let counter = u32::from_be_bytes(counter_bytes);

    Ok(ParsedAuthData { rp_id_hash, flags, counter })
}

fn verify_signature(
    stored_key: &[u8],
    signed_data: &[u8],
    signature: &[u8],
) -> Result<(), CeremonyError> {
    match decode_cose_key(stored_key)? {
        CosePublicKey::Es256 { x, y } => {
            use p256::ecdsa::signature::Verifier as _;

            let point = p256::EncodedPoint::from_affine_coordinates(
                p256::FieldBytes::from_slice(&x),
                p256::FieldBytes::from_slice(&y),
                false,
            );
            let key = p256::ecdsa::VerifyingKey::from_encoded_point(&point).map_err(|_| {
                CeremonyError::BadStoredKey(CoseError::Malformed {
                    reason: "point not on curve".to_string(),
                })
            })?;
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|_| CeremonyError::InvalidSignature)?;

            key.verify(signed_data, &sig).map_err(|_| CeremonyError::InvalidSignature)
        },
        CosePublicKey::Ed25519 { bytes } => {
            let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| {
                CeremonyError::BadStoredKey(CoseError::Malformed {
                    reason: "invalid ed25519 point".to_string(),
                })
            })?;
            let sig = ed25519_dalek::Signature::from_slice(signature)
                .map_err(|_| CeremonyError::InvalidSignature)?;

            key.verify_strict(signed_data, &sig).map_err(|_| CeremonyError::InvalidSignature)
        },
    }
}

/// Anti-clone counter rule.
///
/// Authenticators without a counter always report zero; a zero/zero pair
/// is the one accepted non-increase. Any other `received <= stored` means
/// a second device holds the same private key.
fn check_counter(stored: u32, received: u32) -> Result<(), CeremonyError> {
    if stored == 0 && received == 0 {
        return Ok(());
    }
    if received <= stored {
        return Err(CeremonyError::CounterReplay { stored, received });
    }
    Ok(())
}

/// Build authenticator data bytes (rpIdHash || flags || counter).
///
/// Exposed for tests and enrollment tooling that need well-formed
/// authenticator data without a real authenticator.
pub fn build_authenticator_data(rp_id: &str, flags: u8, counter: u32) -> Vec<u8> {
    let rp_id_hash: [u8; 32] = Sha256::digest(rp_id.as_bytes()).into();
    let mut data = Vec::with_capacity(MIN_AUTH_DATA_LEN);
    data.extend_from_slice(&rp_id_hash);
    data.push(flags);
    data.extend_from_slice(&counter.to_be_bytes());
    data
}
