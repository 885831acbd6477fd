//! The unlock flow: PRF output in, validated working key out.
//!
//! Order matters here. The key is derived first, then checked against the
//! stored key-check value, and only a key that passes the check is cached
//! or handed out for encryption. A wrong passkey produces a cleanly
//! refused unlock, never a plausible-looking key that would seal data
//! nobody can open again.

use sealkey_core::{Environment, KeyDerivationParams};
use sealkey_crypto::{
    Envelope, KeyCheckValue, MasterKey, derive_master_key, derive_subkey, generate_check_value,
    open_field, seal_field, validate_check_value,
};

use crate::{backend::CacheBackend, error::ClientError, key_cache::KeyCache};

/// A derived key that passed (or anchored) the key check.
///
/// The only way to get one is through [`unlock_with_prf`] or
/// [`unlock_from_cache`], so holding an `UnlockedKey` means the key-check
/// invariant held for this unlock.
pub struct UnlockedKey {
    key: MasterKey,
}

impl UnlockedKey {
    /// The underlying master key.
    pub fn master(&self) -> &MasterKey {
        &self.key
    }

    /// Derive the per-scope subkey for a label (attachments etc.).
    pub fn subkey(&self, scope_label: &[u8]) -> MasterKey {
        derive_subkey(&self.key, scope_label)
    }

    /// Encrypt a field value with a fresh random IV.
    pub fn seal_field<E: Environment>(&self, env: &E, value: &str) -> Envelope {
        seal_field(&self.key, value, env.random_array())
    }

    /// Decrypt a field value.
    ///
    /// # Errors
    ///
    /// `DecryptionFailed` (wrong key or tampered envelope) and the other
    /// envelope errors, via [`ClientError::Crypto`].
    pub fn open_field(&self, envelope: &Envelope) -> Result<String, ClientError> {
        Ok(open_field(&self.key, envelope)?)
    }
}

/// Result of a successful PRF unlock.
pub struct UnlockOutcome {
    /// The validated working key.
    pub key: UnlockedKey,
    /// Freshly computed key-check value when the parameters had none.
    /// Report it to the server so the canonical key gets anchored.
    pub computed_check: Option<KeyCheckValue>,
}

/// Derive, check, and cache the master key from a passkey PRF output.
///
/// When the stored parameters carry a key-check value the derived key
/// must match it; a mismatch means the wrong passkey evaluated the PRF
/// and the unlock is refused outright. When no check value exists yet
/// (first unlock) one is computed and returned for backfill.
///
/// The validated key is cached under the owner scope; cache failures are
/// not errors.
///
/// # Errors
///
/// - [`ClientError::KeyCheckMismatch`] for a wrong passkey
/// - [`ClientError::Crypto`] for an undersized PRF output
pub async fn unlock_with_prf<B: CacheBackend, E: Environment>(
    params: &KeyDerivationParams,
    prf_output: &[u8],
    cache: &KeyCache<B, E>,
) -> Result<UnlockOutcome, ClientError> {
    let key = derive_master_key(prf_output, &params.prf_salt, params.version)?;

    let computed_check = match &params.key_check_value {
        Some(stored) => {
            if !validate_check_value(&key, stored) {
                tracing::warn!(owner = %params.owner_id, "unlock refused: key check mismatch");
                return Err(ClientError::KeyCheckMismatch);
            }
            None
        },
        None => {
            tracing::info!(owner = %params.owner_id, "first unlock, anchoring key check");
            Some(generate_check_value(&key))
        },
    };

    cache.store(&params.owner_id.to_string(), &key).await;

    Ok(UnlockOutcome { key: UnlockedKey { key }, computed_check })
}

/// Try to unlock from the session cache without a passkey ceremony.
///
/// A cached key is still validated against the stored key-check value
/// before use; a stale or corrupted entry is purged and treated as a
/// miss, sending the caller to the full PRF flow.
pub async fn unlock_from_cache<B: CacheBackend, E: Environment>(
    params: &KeyDerivationParams,
    cache: &KeyCache<B, E>,
) -> Option<UnlockedKey> {
    let scope = params.owner_id.to_string();
    let key = cache.get(&scope).await?;

    if let Some(stored) = &params.key_check_value
        && !validate_check_value(&key, stored)
    {
        tracing::warn!(owner = %params.owner_id, "cached key fails key check, purging");
        cache.delete(&scope).await;
        return None;
    }

    Some(UnlockedKey { key })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use sealkey_crypto::{CryptoError, PRF_SALT_SIZE};
    use uuid::Uuid;

    use super::*;
    use crate::backend::MemoryBackend;

    #[derive(Clone)]
    struct TestEnv {
        clock_secs: Arc<AtomicU64>,
        rng_counter: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self {
                clock_secs: Arc::new(AtomicU64::new(1_700_000_000)),
                rng_counter: Arc::new(AtomicU64::new(1)),
            }
        }
    }

    impl Environment for TestEnv {
        type Instant = std::time::Instant;

        #[allow(clippy::disallowed_methods)]
        fn now(&self) -> Self::Instant {
            std::time::Instant::now()
        }

        fn wall_clock_secs(&self) -> u64 {
            self.clock_secs.load(Ordering::SeqCst)
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let draw = self.rng_counter.fetch_add(1, Ordering::SeqCst);
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = (draw as u8).wrapping_add(i as u8);
            }
        }
    }

    fn params(owner: Uuid, check: Option<KeyCheckValue>) -> KeyDerivationParams {
        KeyDerivationParams {
            owner_id: owner,
            prf_salt: [0x42; PRF_SALT_SIZE],
            credential_id: vec![1u8; 16],
            version: 1,
            key_check_value: check,
        }
    }

    fn cache() -> KeyCache<MemoryBackend, TestEnv> {
        KeyCache::new(MemoryBackend::new(), TestEnv::new())
    }

    #[tokio::test]
    async fn first_unlock_computes_a_check_value() {
        let owner = Uuid::new_v4();
        let cache = cache();

        let outcome = unlock_with_prf(&params(owner, None), &[0x11; 32], &cache).await.unwrap();
        let check = outcome.computed_check.expect("first unlock must anchor");

        // The computed check matches the derived key.
        assert!(validate_check_value(outcome.key.master(), &check));
    }

    #[tokio::test]
    async fn anchored_unlock_returns_no_check_and_accepts_same_passkey() {
        let owner = Uuid::new_v4();
        let cache = cache();

        let first = unlock_with_prf(&params(owner, None), &[0x11; 32], &cache).await.unwrap();
        let anchored = params(owner, first.computed_check);

        let second = unlock_with_prf(&anchored, &[0x11; 32], &cache).await.unwrap();
        assert!(second.computed_check.is_none());
        assert_eq!(second.key.master(), first.key.master());
    }

    #[tokio::test]
    async fn wrong_passkey_is_refused_and_nothing_is_cached() {
        let owner = Uuid::new_v4();
        let backend = MemoryBackend::new();
        let cache = KeyCache::new(backend.clone(), TestEnv::new());

        let first = unlock_with_prf(&params(owner, None), &[0x11; 32], &cache).await.unwrap();
        let anchored = params(owner, first.computed_check);
        cache.clear_all().await;

        // A different passkey produces a different PRF output.
        let result = unlock_with_prf(&anchored, &[0x22; 32], &cache).await;
        assert!(matches!(result, Err(ClientError::KeyCheckMismatch)));
        assert_eq!(backend.entry_count(), 0);
    }

    #[tokio::test]
    async fn undersized_prf_output_is_rejected() {
        let cache = cache();
        let result = unlock_with_prf(&params(Uuid::new_v4(), None), &[0x11; 8], &cache).await;
        assert!(matches!(result, Err(ClientError::Crypto(_))));
    }

    #[tokio::test]
    async fn unlock_from_cache_skips_the_ceremony() {
        let owner = Uuid::new_v4();
        let cache = cache();

        let first = unlock_with_prf(&params(owner, None), &[0x11; 32], &cache).await.unwrap();
        let anchored = params(owner, first.computed_check);

        let cached = unlock_from_cache(&anchored, &cache).await.expect("cache hit");
        assert_eq!(cached.master(), first.key.master());
    }

    #[tokio::test]
    async fn poisoned_cache_entry_is_purged_not_used() {
        let owner = Uuid::new_v4();
        let backend = MemoryBackend::new();
        let cache = KeyCache::new(backend.clone(), TestEnv::new());

        let first = unlock_with_prf(&params(owner, None), &[0x11; 32], &cache).await.unwrap();
        let anchored = params(owner, first.computed_check);

        // Overwrite the cached entry with a different key.
        cache.store(&owner.to_string(), &MasterKey::from_bytes([9u8; 32])).await;

        assert!(unlock_from_cache(&anchored, &cache).await.is_none());
        assert_eq!(backend.entry_count(), 0, "bad entry purged");
    }

    #[tokio::test]
    async fn unlocked_key_seals_and_opens_fields() {
        let owner = Uuid::new_v4();
        let env = TestEnv::new();
        let cache = KeyCache::new(MemoryBackend::new(), env.clone());

        let outcome = unlock_with_prf(&params(owner, None), &[0x11; 32], &cache).await.unwrap();

        let envelope = outcome.key.seal_field(&env, "patient notes");
        assert_eq!(outcome.key.open_field(&envelope).unwrap(), "patient notes");

        // A key from a different passkey cannot open the field.
        let other =
            unlock_with_prf(&params(Uuid::new_v4(), None), &[0x22; 32], &cache).await.unwrap();
        assert!(matches!(
            other.key.open_field(&envelope),
            Err(ClientError::Crypto(CryptoError::DecryptionFailed))
        ));
    }

    #[tokio::test]
    async fn subkeys_differ_from_master_and_each_other() {
        let cache = cache();
        let outcome =
            unlock_with_prf(&params(Uuid::new_v4(), None), &[0x11; 32], &cache).await.unwrap();

        let attachments = outcome.key.subkey(b"attachments");
        let exports = outcome.key.subkey(b"exports");

        assert_ne!(&attachments, outcome.key.master());
        assert_ne!(attachments, exports);
    }
}
