//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test error handling
//! and recovery. Used for chaos testing to ensure ceremonies fail closed
//! when storage misbehaves.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use sealkey_core::{Credential, KeyDerivationParams};
use sealkey_crypto::KeyCheckValue;
use uuid::Uuid;

use super::{CredentialStore, StorageError};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but randomly fails
/// operations based on a configured failure rate. Uses Arc<Mutex<>> for
/// the RNG state, making it Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticStore<S: CredentialStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operation counter for oracles in tests
    operation_count: Arc<Mutex<usize>>,
}

/// Simple deterministic RNG for chaos injection
///
/// Uses linear congruential generator (LCG) for fast, deterministic
/// randomness. This ensures chaos tests are reproducible with the same
/// seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    /// Check if we should fail (returns true with probability = `failure_rate`)
    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: CredentialStore> ChaoticStore<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    ///
    /// Each call to any storage method increments this counter, including
    /// calls that were failed by injection.
    pub fn operation_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    /// Increment operation counter
    fn increment_operation_count(&self) {
        #[allow(clippy::expect_used)]
        let mut count = self.operation_count.lock().expect("operation_count mutex poisoned");
        *count += 1;
    }

    /// Check if this operation should fail
    fn should_fail(&self) -> bool {
        #[allow(clippy::expect_used)]
        self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate)
    }
}

impl<S: CredentialStore> CredentialStore for ChaoticStore<S> {
    fn insert_credential(&self, credential: &Credential) -> Result<(), StorageError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.insert_credential(credential)
    }

    fn credential(&self, credential_id: &[u8]) -> Result<Option<Credential>, StorageError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.credential(credential_id)
    }

    fn credentials_for_owner(&self, owner_id: Uuid) -> Result<Vec<Credential>, StorageError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.credentials_for_owner(owner_id)
    }

    fn remove_credential(&self, credential_id: &[u8]) -> Result<bool, StorageError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.remove_credential(credential_id)
    }

    fn update_counter(
        &self,
        credential_id: &[u8],
        expected_counter: u32,
        new_counter: u32,
        last_used_at_secs: u64,
    ) -> Result<(), StorageError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.update_counter(credential_id, expected_counter, new_counter, last_used_at_secs)
    }

    fn insert_params(&self, params: &KeyDerivationParams) -> Result<(), StorageError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.insert_params(params)
    }

    fn params_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<KeyDerivationParams>, StorageError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.params_for_owner(owner_id)
    }

    fn set_key_check_value(
        &self,
        owner_id: Uuid,
        check_value: &KeyCheckValue,
    ) -> Result<(), StorageError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.set_key_check_value(owner_id, check_value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{super::MemoryStore, *};

    fn create_test_credential(owner_id: Uuid) -> Credential {
        Credential {
            credential_id: vec![1u8; 16],
            owner_id,
            public_key: vec![0xAA; 77],
            signature_counter: 0,
            transports: BTreeSet::new(),
            created_at_secs: 0,
            last_used_at_secs: 0,
        }
    }

    #[test]
    fn test_zero_failure_rate_delegates() {
        let store = ChaoticStore::new(MemoryStore::new(), 0.0);
        let credential = create_test_credential(Uuid::new_v4());

        store.insert_credential(&credential).unwrap();
        assert!(store.credential(&credential.credential_id).unwrap().is_some());
        assert_eq!(store.operation_count(), 2);
    }

    #[test]
    fn test_full_failure_rate_always_fails() {
        let store = ChaoticStore::new(MemoryStore::new(), 1.0);
        let credential = create_test_credential(Uuid::new_v4());

        assert!(store.insert_credential(&credential).is_err());
        assert!(store.credential(&credential.credential_id).is_err());

        // Nothing reached the inner store.
        assert_eq!(store.inner().credential_count(), 0);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let outcomes = |seed: u64| -> Vec<bool> {
            let store = ChaoticStore::with_seed(MemoryStore::new(), 0.5, seed);
            (0..20).map(|_| store.params_for_owner(Uuid::nil()).is_err()).collect()
        };

        assert_eq!(outcomes(42), outcomes(42));
        assert_ne!(outcomes(42), outcomes(43));
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between")]
    fn test_invalid_failure_rate_panics() {
        let _ = ChaoticStore::new(MemoryStore::new(), 1.5);
    }
}
