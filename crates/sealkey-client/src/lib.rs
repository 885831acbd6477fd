//! Sealkey Client
//!
//! Client-side half of the passkey-bound encryption subsystem: the unlock
//! flow (derive the master key from a PRF output, validate it against the
//! stored key-check value, cache it) and the session key cache that
//! tolerates a slow, flaky, or absent backend.
//!
//! Key material never leaves this side. The server only ever sees the
//! derivation salt and the non-secret key-check fingerprint; a cache
//! failure is always recoverable by re-deriving from a fresh passkey
//! ceremony.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backend;
pub mod error;
pub mod key_cache;
pub mod unlock;

pub use backend::{CacheBackend, CacheEntry, FlakyBackend, FlakyMode, MemoryBackend};
pub use error::ClientError;
pub use key_cache::{CACHE_TTL_SECS, KeyCache};
pub use unlock::{UnlockOutcome, UnlockedKey, unlock_from_cache, unlock_with_prf};
