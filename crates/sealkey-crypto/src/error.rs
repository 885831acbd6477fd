//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from key derivation, key-check, and envelope operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// PRF output is too short to derive a key from
    #[error("prf output too short: {actual} bytes, need at least {minimum}")]
    PrfOutputTooShort {
        /// Actual PRF output length
        actual: usize,
        /// Minimum accepted length
        minimum: usize,
    },

    /// Envelope carries a version this build cannot decrypt
    #[error("unsupported envelope version: {version}")]
    UnsupportedVersion {
        /// Version byte found in the envelope
        version: u8,
    },

    /// Envelope string failed structural validation before any decryption
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// What failed to parse
        reason: String,
    },

    /// Authentication tag mismatch: wrong key, tampered ciphertext, or
    /// AAD mismatch. Deliberately carries no distinguishing detail.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Decrypted bytes were expected to be UTF-8 field text but are not
    #[error("decrypted field is not valid utf-8")]
    NotUtf8,
}

impl CryptoError {
    /// Returns true if this error indicates a wrong key or corrupted data,
    /// as opposed to a structurally invalid input.
    ///
    /// Callers use this to distinguish "could not decrypt" (re-unlock and
    /// retry) from "this was never an envelope" (data bug).
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::DecryptionFailed | Self::NotUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_failure_classification() {
        assert!(CryptoError::DecryptionFailed.is_decryption_failure());
        assert!(CryptoError::NotUtf8.is_decryption_failure());
        assert!(
            !CryptoError::MalformedEnvelope { reason: "bad base64".to_string() }
                .is_decryption_failure()
        );
        assert!(!CryptoError::UnsupportedVersion { version: 9 }.is_decryption_failure());
    }

    #[test]
    fn display_messages_are_stable() {
        let err = CryptoError::PrfOutputTooShort { actual: 4, minimum: 16 };
        assert_eq!(err.to_string(), "prf output too short: 4 bytes, need at least 16");

        // DecryptionFailed must not leak why it failed.
        assert_eq!(CryptoError::DecryptionFailed.to_string(), "decryption failed");
    }
}
