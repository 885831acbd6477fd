//! Client-side error types.

use sealkey_crypto::CryptoError;
use thiserror::Error;

/// Errors from the client-side unlock flow.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The derived key does not match the stored key-check value: the
    /// wrong passkey (or PRF output) was used. Fatal to this unlock, not
    /// destructive; nothing is deleted.
    #[error("derived key fails the stored key check")]
    KeyCheckMismatch,

    /// Derivation or envelope failure from the crypto layer.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
