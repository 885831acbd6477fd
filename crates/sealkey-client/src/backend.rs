//! Cache backend abstraction and test doubles.
//!
//! The backend is whatever session-scoped storage the platform offers;
//! it is allowed to be slow, to fail, or to evict entries at any time.
//! [`crate::KeyCache`] is responsible for making that safe; the backend
//! just stores bytes.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory map behind the async surface")]

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{Arc, Mutex},
};

use sealkey_crypto::KEY_SIZE;

/// One cached key with its storage timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Raw key bytes.
    pub key: [u8; KEY_SIZE],
    /// Wall-clock seconds when the entry was stored; entries expire 24 h
    /// later.
    pub cached_at_secs: u64,
}

/// Session-scoped key storage.
///
/// Every method may take arbitrarily long or fail; the cache layer wraps
/// each call in a timeout and treats failures as misses. `String` errors
/// only: the cache never branches on the failure, it just logs it.
pub trait CacheBackend: Send + Sync + 'static {
    /// Fetch the entry for a scope.
    fn get(&self, scope: &str) -> impl Future<Output = Result<Option<CacheEntry>, String>> + Send;

    /// Store an entry for a scope, replacing any existing one.
    fn put(&self, scope: &str, entry: CacheEntry) -> impl Future<Output = Result<(), String>> + Send;

    /// Delete the entry for a scope. Deleting an absent scope is fine.
    fn delete(&self, scope: &str) -> impl Future<Output = Result<(), String>> + Send;

    /// Delete everything. Sign-out hook.
    fn clear(&self) -> impl Future<Output = Result<(), String>> + Send;
}

/// In-memory backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test code.
    #[allow(clippy::expect_used)]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").len()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.inner.lock().expect("Mutex poisoned")
    }
}

impl CacheBackend for MemoryBackend {
    async fn get(&self, scope: &str) -> Result<Option<CacheEntry>, String> {
        Ok(self.lock().get(scope).cloned())
    }

    async fn put(&self, scope: &str, entry: CacheEntry) -> Result<(), String> {
        self.lock().insert(scope.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, scope: &str) -> Result<(), String> {
        self.lock().remove(scope);
        Ok(())
    }

    async fn clear(&self) -> Result<(), String> {
        self.lock().clear();
        Ok(())
    }
}

/// Scripted behavior for one [`FlakyBackend`] operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlakyMode {
    /// Delegate to the inner backend.
    Ok,
    /// Fail immediately.
    Error,
    /// Never resolve; the caller's timeout must fire.
    Hang,
}

/// Fault-injecting backend wrapper for resilience tests.
///
/// Each operation pops the next scripted [`FlakyMode`]; an exhausted
/// script behaves as `Ok`. Deterministic, so tests assert exact
/// retry/timeout behavior.
#[derive(Clone)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    script: Arc<Mutex<VecDeque<FlakyMode>>>,
}

impl FlakyBackend {
    /// Wrap an in-memory backend with a behavior script.
    pub fn new(inner: MemoryBackend, script: impl IntoIterator<Item = FlakyMode>) -> Self {
        Self { inner, script: Arc::new(Mutex::new(script.into_iter().collect())) }
    }

    /// The wrapped backend, for seeding and post-hoc assertions.
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    #[allow(clippy::expect_used)]
    fn next_mode(&self) -> FlakyMode {
        self.script.lock().expect("Mutex poisoned").pop_front().unwrap_or(FlakyMode::Ok)
    }

    async fn gate(&self) -> Result<(), String> {
        match self.next_mode() {
            FlakyMode::Ok => Ok(()),
            FlakyMode::Error => Err("injected backend failure".to_string()),
            FlakyMode::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves");
            },
        }
    }
}

impl CacheBackend for FlakyBackend {
    async fn get(&self, scope: &str) -> Result<Option<CacheEntry>, String> {
        self.gate().await?;
        self.inner.get(scope).await
    }

    async fn put(&self, scope: &str, entry: CacheEntry) -> Result<(), String> {
        self.gate().await?;
        self.inner.put(scope, entry).await
    }

    async fn delete(&self, scope: &str) -> Result<(), String> {
        self.gate().await?;
        self.inner.delete(scope).await
    }

    async fn clear(&self) -> Result<(), String> {
        self.gate().await?;
        self.inner.clear().await
    }
}
