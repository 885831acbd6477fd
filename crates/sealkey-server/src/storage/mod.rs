//! Storage abstraction for credentials and key-derivation parameters.
//!
//! Trait-based abstraction for persisting passkey credentials and the
//! per-owner key-derivation record. The trait is synchronous (no async) to
//! maintain a clean synchronous API design; the service layer wraps calls
//! as needed.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStore;
pub use error::StorageError;
pub use memory::MemoryStore;
use sealkey_core::{Credential, KeyDerivationParams};
use sealkey_crypto::KeyCheckValue;
use uuid::Uuid;

pub use self::redb::RedbStore;

/// Storage abstraction for credentials and key-derivation parameters.
///
/// Must be Clone (shared across ceremony handlers), Send + Sync
/// (thread-safe), and synchronous (no async methods). Implementations
/// typically share internal state via Arc, so clones access the same
/// underlying storage.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock). Acceptable for
/// test/simulation code, but production implementations should handle
/// poisoned mutexes gracefully.
pub trait CredentialStore: Clone + Send + Sync + 'static {
    /// Store a newly enrolled credential.
    ///
    /// Credential IDs are globally unique; storing an ID that already
    /// exists fails with `AlreadyExists` regardless of owner.
    fn insert_credential(&self, credential: &Credential) -> Result<(), StorageError>;

    /// Look up a credential by its raw ID.
    ///
    /// Returns `None` if no credential with this ID exists.
    fn credential(&self, credential_id: &[u8]) -> Result<Option<Credential>, StorageError>;

    /// All credentials enrolled for an owner. Order is not guaranteed.
    fn credentials_for_owner(&self, owner_id: Uuid) -> Result<Vec<Credential>, StorageError>;

    /// Remove a credential. Returns `true` if a credential was removed,
    /// `false` if the ID was not present.
    fn remove_credential(&self, credential_id: &[u8]) -> Result<bool, StorageError>;

    /// Persist a verified signature counter, compare-and-swap style.
    ///
    /// # Invariants
    ///
    /// - Pre: `expected_counter` is the counter the verifier read before
    ///   checking the assertion.
    /// - Post: the stored counter equals `new_counter` and
    ///   `last_used_at_secs` is updated, or nothing changed and
    ///   `Conflict` is returned (a concurrent ceremony won the race).
    fn update_counter(
        &self,
        credential_id: &[u8],
        expected_counter: u32,
        new_counter: u32,
        last_used_at_secs: u64,
    ) -> Result<(), StorageError>;

    /// Store key-derivation parameters for an owner.
    ///
    /// First write wins: if parameters already exist for this owner, this
    /// is a no-op. The PRF salt must never change once issued, otherwise
    /// previously sealed data becomes unrecoverable.
    fn insert_params(&self, params: &KeyDerivationParams) -> Result<(), StorageError>;

    /// Load key-derivation parameters for an owner.
    ///
    /// Returns `None` if the owner has never set up encryption.
    fn params_for_owner(&self, owner_id: Uuid) -> Result<Option<KeyDerivationParams>, StorageError>;

    /// Backfill the key-check value for an owner.
    ///
    /// Only writes when no check value is stored yet; an existing value is
    /// never overwritten (it anchors which derived key is canonical).
    /// No-op if the owner has no parameters.
    fn set_key_check_value(
        &self,
        owner_id: Uuid,
        check_value: &KeyCheckValue,
    ) -> Result<(), StorageError>;
}
