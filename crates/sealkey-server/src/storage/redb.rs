//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Credentials, the owner index, and key-derivation parameters all survive
//! server restarts.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};
use sealkey_core::{Credential, KeyDerivationParams};
use sealkey_crypto::KeyCheckValue;
use uuid::Uuid;

use super::{CredentialStore, StorageError};

/// Table: credentials
/// Key: raw credential ID bytes
/// Value: CBOR-encoded Credential
const CREDENTIALS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("credentials");

/// Table: owner index
/// Key: owner UUID (16 bytes) + credential ID bytes
/// Value: empty
///
/// Lets `credentials_for_owner` range-scan by owner prefix instead of
/// walking the whole CREDENTIALS table.
const OWNER_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("owner_index");

/// Table: derivation params
/// Key: owner UUID (16 bytes)
/// Value: CBOR-encoded KeyDerivationParams
const PARAMS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("params");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
/// Write transactions are serialized by Redb, which is what makes
/// `update_counter` an honest compare-and-swap across threads.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (CREDENTIALS, OWNER_INDEX,
    /// PARAMS).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(CREDENTIALS).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(OWNER_INDEX).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(PARAMS).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl CredentialStore for RedbStore {
    fn insert_credential(&self, credential: &Credential) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(CREDENTIALS).map_err(|e| StorageError::Io(e.to_string()))?;

            if table
                .get(credential.credential_id.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .is_some()
            {
                return Err(StorageError::AlreadyExists);
            }

            let mut bytes = Vec::new();
            ciborium::into_writer(credential, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            table
                .insert(credential.credential_id.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;

            let mut index =
                txn.open_table(OWNER_INDEX).map_err(|e| StorageError::Io(e.to_string()))?;
            let index_key =
                encode_owner_index_key(credential.owner_id, &credential.credential_id);
            index
                .insert(index_key.as_slice(), b"".as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn credential(&self, credential_id: &[u8]) -> Result<Option<Credential>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(CREDENTIALS).map_err(|e| StorageError::Io(e.to_string()))?;

        match table.get(credential_id).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => {
                let credential: Credential = ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(credential))
            },
            None => Ok(None),
        }
    }

    fn credentials_for_owner(&self, owner_id: Uuid) -> Result<Vec<Credential>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let index = txn.open_table(OWNER_INDEX).map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(CREDENTIALS).map_err(|e| StorageError::Io(e.to_string()))?;

        let prefix = owner_id.into_bytes();
        let results = index
            .range(prefix.as_slice()..)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let mut credentials = Vec::new();
        for result in results {
            let (key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let key_bytes = key.value();

            if !key_bytes.starts_with(&prefix) {
                break;
            }

            let credential_id = &key_bytes[prefix.len()..];
            if let Some(value) =
                table.get(credential_id).map_err(|e| StorageError::Io(e.to_string()))?
            {
                let credential: Credential = ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                credentials.push(credential);
            }
        }

        Ok(credentials)
    }

    fn remove_credential(&self, credential_id: &[u8]) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let removed;
        {
            let mut table =
                txn.open_table(CREDENTIALS).map_err(|e| StorageError::Io(e.to_string()))?;

            let owner_id = match table
                .remove(credential_id)
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                Some(value) => {
                    let credential: Credential = ciborium::from_reader(value.value())
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    Some(credential.owner_id)
                },
                None => None,
            };

            removed = owner_id.is_some();

            if let Some(owner_id) = owner_id {
                let mut index =
                    txn.open_table(OWNER_INDEX).map_err(|e| StorageError::Io(e.to_string()))?;
                let index_key = encode_owner_index_key(owner_id, credential_id);
                index
                    .remove(index_key.as_slice())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(removed)
    }

    fn update_counter(
        &self,
        credential_id: &[u8],
        expected_counter: u32,
        new_counter: u32,
        last_used_at_secs: u64,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(CREDENTIALS).map_err(|e| StorageError::Io(e.to_string()))?;

            let mut credential = match table
                .get(credential_id)
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                Some(value) => {
                    let credential: Credential = ciborium::from_reader(value.value())
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    credential
                },
                None => return Err(StorageError::NotFound),
            };

            if credential.signature_counter != expected_counter {
                return Err(StorageError::Conflict {
                    expected: expected_counter,
                    found: credential.signature_counter,
                });
            }

            credential.signature_counter = new_counter;
            credential.last_used_at_secs = last_used_at_secs;

            let mut bytes = Vec::new();
            ciborium::into_writer(&credential, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            table
                .insert(credential_id, bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn insert_params(&self, params: &KeyDerivationParams) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table = txn.open_table(PARAMS).map_err(|e| StorageError::Io(e.to_string()))?;

            let key = params.owner_id.into_bytes();

            if table.get(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?.is_some() {
                return Ok(()); // Already set up, never overwrite the salt
            }

            let mut bytes = Vec::new();
            ciborium::into_writer(params, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            table
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn params_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<KeyDerivationParams>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(PARAMS).map_err(|e| StorageError::Io(e.to_string()))?;

        let key = owner_id.into_bytes();

        match table.get(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => {
                let params: KeyDerivationParams = ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(params))
            },
            None => Ok(None),
        }
    }

    fn set_key_check_value(
        &self,
        owner_id: Uuid,
        check_value: &KeyCheckValue,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table = txn.open_table(PARAMS).map_err(|e| StorageError::Io(e.to_string()))?;

            let key = owner_id.into_bytes();

            let mut params = match table
                .get(key.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                Some(value) => {
                    let params: KeyDerivationParams = ciborium::from_reader(value.value())
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    params
                },
                None => return Ok(()),
            };

            if params.key_check_value.is_some() {
                return Ok(()); // Anchor already set, never overwrite
            }

            params.key_check_value = Some(*check_value);

            let mut bytes = Vec::new();
            ciborium::into_writer(&params, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            table
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }
}

/// Encode (owner, credential ID) as an owner-prefixed index key.
///
/// Layout: [owner UUID: 16 bytes][credential ID bytes]
/// Owner-prefix ordering makes per-owner enumeration a range scan.
fn encode_owner_index_key(owner_id: Uuid, credential_id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + credential_id.len());
    key.extend_from_slice(owner_id.as_bytes());
    key.extend_from_slice(credential_id);
    key
}
