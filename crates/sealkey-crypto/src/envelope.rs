//! Per-field envelope encryption using AES-256-GCM
//!
//! Every encrypted attribute on every entity uses the same shape: a
//! versioned `{iv, ciphertext}` envelope serialized to a compact JSON
//! string that downstream storage treats as opaque. Encryption is
//! per-field, not per-record, so a single field can be rewritten without
//! touching its siblings.
//!
//! All functions are pure - the random IV must be provided by the caller.
//! This enables deterministic testing; production callers draw the IV from
//! their `Environment`. IV reuse under the same key is the one absolute
//! forbidden condition.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde::{Deserialize, Serialize};

use crate::{derive::MasterKey, error::CryptoError};

/// Size of the AES-GCM IV in bytes (96 bits).
pub const IV_SIZE: usize = 12;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// One encrypted field value or binary blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Random 12-byte IV, unique per encryption under a given key.
    pub iv: [u8; IV_SIZE],
    /// Ciphertext including the 16-byte GCM authentication tag.
    pub ciphertext: Vec<u8>,
    /// Format version this envelope was produced under.
    pub version: u8,
}

/// On-the-wire shape. Storage layers treat the serialized form as an
/// opaque string and validate nothing beyond "parses as an envelope".
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    iv: String,
    ct: String,
    v: u8,
}

impl Envelope {
    /// Serialize to the compact wire string.
    pub fn to_wire(&self) -> String {
        let wire = WireEnvelope {
            iv: B64.encode(self.iv),
            ct: B64.encode(&self.ciphertext),
            v: self.version,
        };
        let Ok(s) = serde_json::to_string(&wire) else {
            unreachable!("envelope serialization to JSON cannot fail");
        };
        s
    }

    /// Parse an envelope from its wire string.
    ///
    /// # Errors
    ///
    /// - `MalformedEnvelope` for anything that is not a structurally valid
    ///   envelope: bad JSON, bad base64, wrong IV length
    /// - `UnsupportedVersion` for a version this build does not know
    pub fn parse(wire: &str) -> Result<Self, CryptoError> {
        let parsed: WireEnvelope = serde_json::from_str(wire)
            .map_err(|e| CryptoError::MalformedEnvelope { reason: format!("json: {e}") })?;

        if parsed.v == 0 || parsed.v > ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion { version: parsed.v });
        }

        let iv_bytes = B64
            .decode(&parsed.iv)
            .map_err(|_| CryptoError::MalformedEnvelope { reason: "iv base64".to_string() })?;
        let iv: [u8; IV_SIZE] = iv_bytes.try_into().map_err(|_| {
            CryptoError::MalformedEnvelope { reason: "iv length".to_string() }
        })?;

        let ciphertext = B64
            .decode(&parsed.ct)
            .map_err(|_| CryptoError::MalformedEnvelope { reason: "ct base64".to_string() })?;

        Ok(Self { iv, ciphertext, version: parsed.v })
    }
}

/// Encrypt a binary payload with optional associated data.
///
/// The AAD is authenticated but not encrypted: binding a ciphertext to a
/// non-secret context (e.g. the owning record id) means the envelope fails
/// to open if it is ever moved to a different record.
pub fn seal_bytes(
    key: &MasterKey,
    plaintext: &[u8],
    aad: Option<&[u8]>,
    iv: [u8; IV_SIZE],
) -> Envelope {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let payload = Payload { msg: plaintext, aad: aad.unwrap_or(&[]) };

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&iv), payload) else {
        unreachable!("AES-256-GCM encryption cannot fail with a valid key and nonce");
    };

    Envelope { iv, ciphertext, version: ENVELOPE_VERSION }
}

/// Decrypt a binary payload.
///
/// # Errors
///
/// - `UnsupportedVersion` if the envelope's version is unknown
/// - `DecryptionFailed` on tag mismatch: wrong key, tampered ciphertext,
///   or wrong AAD. The error does not say which.
pub fn open_bytes(
    key: &MasterKey,
    envelope: &Envelope,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, CryptoError> {
    if envelope.version == 0 || envelope.version > ENVELOPE_VERSION {
        return Err(CryptoError::UnsupportedVersion { version: envelope.version });
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let payload = Payload { msg: envelope.ciphertext.as_slice(), aad: aad.unwrap_or(&[]) };

    cipher
        .decrypt(Nonce::from_slice(&envelope.iv), payload)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt a UTF-8 field value (title, description, name, note).
pub fn seal_field(key: &MasterKey, value: &str, iv: [u8; IV_SIZE]) -> Envelope {
    seal_bytes(key, value.as_bytes(), None, iv)
}

/// Decrypt a UTF-8 field value.
///
/// # Errors
///
/// Everything `open_bytes` returns, plus `NotUtf8` if the plaintext is not
/// valid UTF-8 (which for a field envelope means corruption).
pub fn open_field(key: &MasterKey, envelope: &Envelope) -> Result<String, CryptoError> {
    let plaintext = open_bytes(key, envelope, None)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::NotUtf8)
}
