//! Sealkey Server
//!
//! Server-side half of the passkey-bound encryption subsystem: challenge
//! issuance inside sealed client-held tokens, the credential store with its
//! compare-and-swap counter update, the attempt governor (sliding window +
//! escalating lockout), and the `AuthService` facade the transport layer
//! calls.
//!
//! # Trust model
//!
//! The server is untrusted with plaintext. It stores credentials, the
//! non-secret derivation salt, and a key-check fingerprint; it never
//! receives PRF outputs or derived keys. Everything it returns to the UI
//! goes through the uniform [`ApiResponse`] envelope with generic error
//! messages: which check failed is logged internally, never surfaced.
//!
//! # Concurrency
//!
//! Verification is stateless per request. The two shared mutable pieces,
//! the signature counter and the attempt counters, are updated through
//! compare-and-swap (storage) and a locked counter store (governor), so
//! two concurrent replays of one assertion cannot both succeed.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod challenge;
pub mod governor;
pub mod service;
pub mod storage;
pub mod system_env;

pub use challenge::{CHALLENGE_TTL_SECS, ChallengeStore};
pub use governor::{AttemptGovernor, CounterStore, Decision, GovernorConfig, LockoutState, MemoryCounters};
pub use service::{
    ApiResponse, AuthConfig, AuthService, AuthSuccess, BeginAuthentication, CredentialSummary,
    ErrorCode, OwnStatus, UnlockData,
};
pub use storage::{ChaoticStore, CredentialStore, MemoryStore, RedbStore, StorageError};
pub use system_env::SystemEnv;
