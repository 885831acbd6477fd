//! Session key cache over an untrusted backend.
//!
//! The backend may hang, throttle, fail, or silently evict. None of that
//! may ever break an unlock: every backend call gets a bounded timeout
//! and exactly one retry, a failed `get` is a miss (the caller
//! re-derives), and failed writes are logged and swallowed. The cache is
//! an optimization, never a source of truth.

use std::{future::Future, time::Duration};

use sealkey_core::Environment;
use sealkey_crypto::MasterKey;

use crate::backend::{CacheBackend, CacheEntry};

/// Cached keys expire 24 hours after storage.
pub const CACHE_TTL_SECS: u64 = 86_400;

/// Per-call backend timeout.
const OP_TIMEOUT: Duration = Duration::from_millis(750);

/// Fixed backoff before the single retry.
const RETRY_BACKOFF: Duration = Duration::from_millis(150);

/// Resilient wrapper around a [`CacheBackend`].
#[derive(Clone)]
pub struct KeyCache<B, E: Environment> {
    backend: B,
    env: E,
}

impl<B: CacheBackend, E: Environment> KeyCache<B, E> {
    /// Wrap a backend.
    pub fn new(backend: B, env: E) -> Self {
        Self { backend, env }
    }

    /// Fetch the cached key for a scope.
    ///
    /// Resolves to `None` on a miss, an expired entry, or any backend
    /// problem that survives the retry. Never fails: a miss just means
    /// the caller re-derives.
    pub async fn get(&self, scope: &str) -> Option<MasterKey> {
        let entry = match self.attempt_twice(|| self.backend.get(scope)).await {
            Ok(entry) => entry?,
            Err(error) => {
                tracing::warn!(scope, error = %error, "cache get failed, treating as miss");
                return None;
            },
        };

        let now = self.env.wall_clock_secs();
        if now.saturating_sub(entry.cached_at_secs) > CACHE_TTL_SECS {
            tracing::debug!(scope, "cached key expired, purging");
            self.delete(scope).await;
            return None;
        }

        Some(MasterKey::from_bytes(entry.key))
    }

    /// Cache a key for a scope. Last writer wins; failures are logged and
    /// swallowed (the key is re-derivable).
    pub async fn store(&self, scope: &str, key: &MasterKey) {
        let entry =
            CacheEntry { key: *key.as_bytes(), cached_at_secs: self.env.wall_clock_secs() };

        if let Err(error) = self.attempt_twice(|| self.backend.put(scope, entry.clone())).await {
            tracing::warn!(scope, error = %error, "cache store failed, key not cached");
        }
    }

    /// Drop the cached key for a scope.
    pub async fn delete(&self, scope: &str) {
        if let Err(error) = self.attempt_twice(|| self.backend.delete(scope)).await {
            tracing::warn!(scope, error = %error, "cache delete failed");
        }
    }

    /// Drop every cached key. Sign-out hook: keys never outlive the
    /// session.
    pub async fn clear_all(&self) {
        if let Err(error) = self.attempt_twice(|| self.backend.clear()).await {
            tracing::warn!(error = %error, "cache clear failed");
        }
    }

    /// Run a backend call with a bounded timeout, retrying exactly once
    /// after a fixed backoff.
    async fn attempt_twice<T, F, Fut>(&self, operation: F) -> Result<T, String>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        match tokio::time::timeout(OP_TIMEOUT, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => {
                tracing::debug!(error = %error, "cache backend call failed, retrying");
            },
            Err(_) => {
                tracing::debug!("cache backend call timed out, retrying");
            },
        }

        self.env.sleep(RETRY_BACKOFF).await;

        match tokio::time::timeout(OP_TIMEOUT, operation()).await {
            Ok(result) => result,
            Err(_) => Err("backend timed out twice".to_string()),
        }
    }
}
