//! Error types for ceremony verification and COSE decoding.
//!
//! These carry full internal detail for logging. They are never shown to
//! users directly: the service layer collapses every verification failure
//! to a generic message so that failures cannot be used to enumerate valid
//! accounts or credentials.

use thiserror::Error;

/// Errors from decoding a stored COSE public key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoseError {
    /// Not a CBOR map, or missing required members
    #[error("malformed COSE key: {reason}")]
    Malformed {
        /// What failed to decode
        reason: String,
    },

    /// Key type / algorithm combination this verifier does not support
    #[error("unsupported COSE key: kty {kty}, alg {alg}")]
    Unsupported {
        /// COSE key type
        kty: i128,
        /// COSE algorithm identifier
        alg: i128,
    },

    /// Coordinate or key bytes had the wrong length
    #[error("invalid key component length: {component} was {actual} bytes")]
    InvalidLength {
        /// Which component (x, y, public key bytes)
        component: &'static str,
        /// Length found
        actual: usize,
    },
}

/// Errors from verifying a signed assertion against a stored credential.
#[derive(Debug, Error)]
pub enum CeremonyError {
    /// Client data or authenticator data failed structural validation
    /// before any cryptographic check ran
    #[error("malformed assertion: {reason}")]
    MalformedAssertion {
        /// What failed to parse
        reason: String,
    },

    /// Embedded challenge does not byte-match the stored challenge
    #[error("challenge mismatch")]
    ChallengeMismatch,

    /// Assertion origin is not in the allow-list
    #[error("origin not allowed: {origin}")]
    OriginMismatch {
        /// Origin the client data claimed
        origin: String,
    },

    /// Relying-party id hash does not match the expected party
    #[error("relying party id hash mismatch")]
    PartyMismatch,

    /// User-presence flag not set: no user interacted with the
    /// authenticator
    #[error("user presence flag not set")]
    UserPresenceMissing,

    /// Stored public key could not be decoded
    #[error("credential public key: {0}")]
    BadStoredKey(#[from] CoseError),

    /// Cryptographic signature verification failed
    #[error("invalid signature")]
    InvalidSignature,

    /// Signature verified but the counter did not increase: cloned
    /// authenticator. Fails the ceremony even though the signature checked
    /// out.
    #[error("counter replay: stored {stored}, received {received}")]
    CounterReplay {
        /// Counter currently persisted for the credential
        stored: u32,
        /// Counter the assertion carried
        received: u32,
    },
}
