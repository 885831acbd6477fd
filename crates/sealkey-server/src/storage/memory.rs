#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use sealkey_core::{Credential, KeyDerivationParams};
use sealkey_crypto::KeyCheckValue;
use uuid::Uuid;

use super::{CredentialStore, StorageError};

/// In-memory storage implementation for testing and simulation.
///
/// Uses `HashMap` keyed by credential ID with a secondary owner index. All
/// state is wrapped in Arc<Mutex<>> to allow Clone and concurrent access.
/// Thread-safe through Mutex, but uses `lock().expect()` which will panic
/// if the mutex is poisoned - acceptable for test code.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

struct MemoryStoreInner {
    /// Credentials keyed by raw credential ID.
    credentials: HashMap<Vec<u8>, Credential>,

    /// Owner index: `owner_id` -> credential IDs enrolled for that owner.
    by_owner: HashMap<Uuid, Vec<Vec<u8>>>,

    /// Key-derivation parameters per owner.
    params: HashMap<Uuid, KeyDerivationParams>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                credentials: HashMap::new(),
                by_owner: HashMap::new(),
                params: HashMap::new(),
            })),
        }
    }

    /// Number of stored credentials across all owners.
    ///
    /// Useful for debugging and testing.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding the lock). This is acceptable for test/simulation code.
    #[allow(clippy::expect_used)]
    pub fn credential_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").credentials.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryStore {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test code.
    #[allow(clippy::expect_used)]
    fn insert_credential(&self, credential: &Credential) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if inner.credentials.contains_key(&credential.credential_id) {
            return Err(StorageError::AlreadyExists);
        }

        inner
            .by_owner
            .entry(credential.owner_id)
            .or_default()
            .push(credential.credential_id.clone());
        inner.credentials.insert(credential.credential_id.clone(), credential.clone());

        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test code.
    #[allow(clippy::expect_used)]
    fn credential(&self, credential_id: &[u8]) -> Result<Option<Credential>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.credentials.get(credential_id).cloned())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test code.
    #[allow(clippy::expect_used)]
    fn credentials_for_owner(&self, owner_id: Uuid) -> Result<Vec<Credential>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        let Some(ids) = inner.by_owner.get(&owner_id) else {
            return Ok(Vec::new());
        };

        Ok(ids.iter().filter_map(|id| inner.credentials.get(id).cloned()).collect())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test code.
    #[allow(clippy::expect_used)]
    fn remove_credential(&self, credential_id: &[u8]) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let Some(credential) = inner.credentials.remove(credential_id) else {
            return Ok(false);
        };

        if let Some(ids) = inner.by_owner.get_mut(&credential.owner_id) {
            ids.retain(|id| id != credential_id);
            if ids.is_empty() {
                inner.by_owner.remove(&credential.owner_id);
            }
        }

        Ok(true)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test code.
    #[allow(clippy::expect_used)]
    fn update_counter(
        &self,
        credential_id: &[u8],
        expected_counter: u32,
        new_counter: u32,
        last_used_at_secs: u64,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let credential =
            inner.credentials.get_mut(credential_id).ok_or(StorageError::NotFound)?;

        if credential.signature_counter != expected_counter {
            return Err(StorageError::Conflict {
                expected: expected_counter,
                found: credential.signature_counter,
            });
        }

        credential.signature_counter = new_counter;
        credential.last_used_at_secs = last_used_at_secs;

        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test code.
    #[allow(clippy::expect_used)]
    fn insert_params(&self, params: &KeyDerivationParams) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .params
            .entry(params.owner_id)
            .or_insert_with(|| params.clone());

        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test code.
    #[allow(clippy::expect_used)]
    fn params_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<KeyDerivationParams>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").params.get(&owner_id).cloned())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test code.
    #[allow(clippy::expect_used)]
    fn set_key_check_value(
        &self,
        owner_id: Uuid,
        check_value: &KeyCheckValue,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if let Some(params) = inner.params.get_mut(&owner_id)
            && params.key_check_value.is_none()
        {
            params.key_check_value = Some(*check_value);
        }

        Ok(())
    }
}
