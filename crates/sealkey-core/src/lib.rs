//! Sealkey Core
//!
//! Domain types and verification logic shared by the server and client
//! crates: credential and key-derivation records, the challenge record, the
//! WebAuthn-style ceremony verifier, COSE public-key decoding, and the
//! `Environment` abstraction that decouples logic from system time and
//! randomness.
//!
//! Verification here is pure: the verifier takes the stored challenge and
//! credential as values and returns what the caller must persist. Atomicity
//! of the counter update (the anti-clone invariant) is enforced by the
//! storage layer in `sealkey-server`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod ceremony;
pub mod cose;
pub mod env;
pub mod error;
pub mod types;

pub use ceremony::{AssertionResponse, VerifiedAssertion, build_authenticator_data, verify_assertion};
pub use cose::{CosePublicKey, decode_cose_key, encode_ed25519_key, encode_es256_key};
pub use env::Environment;
pub use error::{CeremonyError, CoseError};
pub use types::{CHALLENGE_SIZE, Challenge, Credential, KeyDerivationParams};
