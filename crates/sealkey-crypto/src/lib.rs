//! Sealkey Cryptographic Primitives
//!
//! Cryptographic building blocks for the passkey-bound encryption subsystem.
//! Pure functions with deterministic outputs. Callers provide random bytes
//! for deterministic testing.
//!
//! # Key Lifecycle
//!
//! The master key is derived on the client from a per-credential PRF output
//! obtained during a hardware passkey ceremony. The server stores only the
//! derivation salt and a non-secret key-check value; it never receives the
//! PRF output and therefore cannot derive the key even with full database
//! access.
//!
//! ```text
//! PRF Output (hardware ceremony, per credential)
//!        │
//!        ▼
//! HKDF-SHA256(salt, versioned label) → Master Key (256-bit)
//!        │
//!        ├──▶ Key-Check Value (truncated HMAC, stored server-side)
//!        │
//!        ├──▶ Scope Subkeys (HKDF, per-scope labels)
//!        │
//!        ▼
//! AES-256-GCM Envelope → per-field ciphertext
//! ```
//!
//! # Security
//!
//! Determinism:
//! - Same PRF output + same salt + same version always yields the same key
//! - A `version` bump mints a distinct key without touching old ciphertext
//!
//! Key hygiene:
//! - Master keys and subkeys are zeroized on drop
//! - The key-check value is non-reversible (truncated HMAC over a fixed
//!   plaintext) and safe to store server-side
//!
//! Authenticity:
//! - AES-256-GCM detects any ciphertext or AAD tampering
//! - Optional AAD binds a ciphertext to its owning record, so envelopes
//!   cannot be silently moved between records
//! - Wrong-key decryption fails closed, never returns garbage plaintext

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod derive;
pub mod envelope;
pub mod error;
pub mod key_check;

pub use derive::{KEY_SIZE, MasterKey, PRF_SALT_SIZE, derive_master_key, derive_subkey};
pub use envelope::{ENVELOPE_VERSION, Envelope, IV_SIZE, open_bytes, open_field, seal_bytes, seal_field};
pub use error::CryptoError;
pub use key_check::{KCV_SIZE, KeyCheckValue, generate_check_value, validate_check_value};
