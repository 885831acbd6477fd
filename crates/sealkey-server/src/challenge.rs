//! Challenge issuance inside sealed, client-held tokens.
//!
//! Challenges are never persisted server-side. `issue` seals the full
//! challenge record (XChaCha20-Poly1305 under a process-local secret) into
//! an opaque token the client carries through the ceremony; `consume`
//! unseals, validates, and marks it consumed in one atomic step; `clear`
//! invalidates a token without reading it. The only server-side state is a
//! small expiring set of consumed token nonces that enforces single use.
//!
//! `consume` and `retrieve` return `None` for every failure - malformed,
//! tampered, expired, consumed - so callers cannot distinguish why and the
//! endpoint cannot be used as an oracle.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory consumed-set only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use sealkey_core::{CHALLENGE_SIZE, Challenge, Environment};
use sealkey_crypto::PRF_SALT_SIZE;
use uuid::Uuid;

/// Challenge tokens are valid for exactly five minutes.
pub const CHALLENGE_TTL_SECS: u64 = 300;

/// XChaCha20 nonce size prefixing every sealed token.
const NONCE_SIZE: usize = 24;

/// Issues and validates single-use authentication challenges.
///
/// The sealing key is generated at construction and never leaves the
/// process; restarting the server invalidates all outstanding tokens,
/// which is the desired behavior (they are five-minute tokens).
///
/// Clone shares the sealing key and the consumed-token set.
#[derive(Clone)]
pub struct ChallengeStore<E: Environment> {
    env: E,
    cipher: XChaCha20Poly1305,
    /// Nonces of consumed tokens, with the wall-clock second after which
    /// the entry can be dropped (token expiry). Keeps the set bounded.
    consumed: Arc<Mutex<HashMap<[u8; NONCE_SIZE], u64>>>,
}

impl<E: Environment> ChallengeStore<E> {
    /// Create a store with a fresh random sealing key.
    pub fn new(env: E) -> Self {
        let key: [u8; 32] = env.random_array();
        Self {
            env,
            cipher: XChaCha20Poly1305::new(&key.into()),
            consumed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Issue a fresh challenge sealed into an opaque client-held token.
    ///
    /// A new `issue` for the same flow supersedes older tokens naturally:
    /// each token seals an independent challenge, so consuming one never
    /// validates another.
    pub fn issue(
        &self,
        owner_id: Option<Uuid>,
        redirect_hint: Option<String>,
        prf_salt_hint: Option<[u8; PRF_SALT_SIZE]>,
    ) -> (String, Challenge) {
        let challenge = Challenge {
            challenge: self.env.random_array::<CHALLENGE_SIZE>().to_vec(),
            owner_id,
            issued_at_secs: self.env.wall_clock_secs(),
            redirect_hint,
            prf_salt_hint,
        };

        let mut plaintext = Vec::new();
        let Ok(()) = ciborium::into_writer(&challenge, &mut plaintext) else {
            unreachable!("challenge CBOR encoding to a Vec cannot fail");
        };

        let nonce: [u8; NONCE_SIZE] = self.env.random_array();
        let Ok(ciphertext) = self.cipher.encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
        else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        let mut token_bytes = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        token_bytes.extend_from_slice(&nonce);
        token_bytes.extend_from_slice(&ciphertext);

        (URL_SAFE_NO_PAD.encode(token_bytes), challenge)
    }

    /// Unseal, validate, and spend a token in one step.
    ///
    /// The consumed-set check and insert happen under a single lock, so of
    /// any number of concurrent callers redeeming the same token exactly
    /// one receives the challenge. Returns `None` if the token is
    /// malformed, tampered with, already consumed, or past its TTL.
    /// Callers must treat all of these identically to "no challenge".
    pub fn consume(&self, token: &str) -> Option<Challenge> {
        let now = self.env.wall_clock_secs();
        self.purge_consumed(now);

        let (nonce, challenge) = self.unseal(token)?;

        // Spend the token before the expiry check; a single combined
        // check-and-insert, never a separate lookup.
        let drop_after = challenge.issued_at_secs.saturating_add(CHALLENGE_TTL_SECS);
        if self.lock_consumed().insert(nonce, drop_after).is_some() {
            tracing::debug!("challenge token already consumed");
            return None;
        }

        if challenge.is_expired(now, CHALLENGE_TTL_SECS) {
            tracing::debug!("challenge token expired");
            return None;
        }

        Some(challenge)
    }

    /// Unseal and validate a token without spending it.
    ///
    /// Same failure collapse as [`Self::consume`]; for inspection paths
    /// that must not redeem the token.
    pub fn retrieve(&self, token: &str) -> Option<Challenge> {
        let now = self.env.wall_clock_secs();
        self.purge_consumed(now);

        let (nonce, challenge) = self.unseal(token)?;

        if self.is_consumed(&nonce) {
            tracing::debug!("challenge token already consumed");
            return None;
        }

        if challenge.is_expired(now, CHALLENGE_TTL_SECS) {
            tracing::debug!("challenge token expired");
            return None;
        }

        Some(challenge)
    }

    /// Invalidate a token without reading it. Idempotent; unknown or
    /// garbage tokens are ignored.
    pub fn clear(&self, token: &str) {
        if let Some((nonce, challenge)) = self.unseal(token) {
            let drop_after = challenge.issued_at_secs.saturating_add(CHALLENGE_TTL_SECS);
            self.lock_consumed().insert(nonce, drop_after);
        }
    }

    /// Decode, decrypt, and deserialize a token. Only tokens this store
    /// actually sealed come back `Some`, so garbage input can never grow
    /// the consumed set.
    fn unseal(&self, token: &str) -> Option<([u8; NONCE_SIZE], Challenge)> {
        let (nonce, ciphertext) = Self::split_token(token)?;
        let plaintext = self.cipher.decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice()).ok()?;
        let challenge: Challenge = ciborium::from_reader(plaintext.as_slice()).ok()?;
        Some((nonce, challenge))
    }

    fn split_token(token: &str) -> Option<([u8; NONCE_SIZE], Vec<u8>)> {
        let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
        if bytes.len() <= NONCE_SIZE {
            return None;
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..NONCE_SIZE]);
        Some((nonce, bytes[NONCE_SIZE..].to_vec()))
    }

    fn is_consumed(&self, nonce: &[u8; NONCE_SIZE]) -> bool {
        self.lock_consumed().contains_key(nonce)
    }

    fn purge_consumed(&self, now_secs: u64) {
        self.lock_consumed().retain(|_, drop_after| *drop_after >= now_secs);
    }

    /// # Panics
    ///
    /// Panics if the mutex is poisoned (a thread panicked while holding
    /// it), which cannot happen: no code path panics while holding it.
    #[allow(clippy::expect_used)]
    fn lock_consumed(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<[u8; NONCE_SIZE], u64>> {
        self.consumed.lock().expect("Mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU64, Ordering},
        time::Duration,
    };

    use super::*;

    /// Virtual-clock environment with counter-based "randomness".
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

        fn advance_secs(&self, secs: u64) {
            self.clock_secs.fetch_add(secs, Ordering::SeqCst);
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

    #[test]
    fn issue_then_retrieve_returns_same_challenge() {
        let store = ChallengeStore::new(TestEnv::new());
        let (token, issued) = store.issue(None, None, None);

        let retrieved = store.retrieve(&token).unwrap();
        assert_eq!(retrieved, issued);
        assert_eq!(retrieved.challenge.len(), CHALLENGE_SIZE);
    }

    #[test]
    fn issue_carries_hints() {
        let store = ChallengeStore::new(TestEnv::new());
        let owner = Uuid::new_v4();

        let (token, _) =
            store.issue(Some(owner), Some("/tasks".to_string()), Some([7u8; PRF_SALT_SIZE]));
        let retrieved = store.retrieve(&token).unwrap();

        assert_eq!(retrieved.owner_id, Some(owner));
        assert_eq!(retrieved.redirect_hint.as_deref(), Some("/tasks"));
        assert_eq!(retrieved.prf_salt_hint, Some([7u8; PRF_SALT_SIZE]));
    }

    #[test]
    fn retrieve_rejects_garbage_tokens() {
        let store = ChallengeStore::new(TestEnv::new());
        assert!(store.retrieve("").is_none());
        assert!(store.retrieve("!!!not-base64!!!").is_none());
        assert!(store.retrieve("dG9vLXNob3J0").is_none());
    }

    #[test]
    fn retrieve_rejects_tampered_tokens() {
        let store = ChallengeStore::new(TestEnv::new());
        let (token, _) = store.issue(None, None, None);

        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);

        assert!(store.retrieve(&tampered).is_none());
    }

    #[test]
    fn retrieve_rejects_foreign_tokens() {
        // A token sealed by a different store (different process secret).
        let store_a = ChallengeStore::new(TestEnv::new());
        let store_b = ChallengeStore::new({
            let env = TestEnv::new();
            env.rng_counter.store(99, Ordering::SeqCst);
            env
        });

        let (token, _) = store_b.issue(None, None, None);
        assert!(store_a.retrieve(&token).is_none());
    }

    #[test]
    fn token_expires_after_ttl() {
        let env = TestEnv::new();
        let store = ChallengeStore::new(env.clone());
        let (token, _) = store.issue(None, None, None);

        env.advance_secs(CHALLENGE_TTL_SECS);
        assert!(store.retrieve(&token).is_some(), "valid at exactly the TTL boundary");

        env.advance_secs(1);
        assert!(store.retrieve(&token).is_none(), "expired one second past the TTL");
    }

    #[test]
    fn consume_spends_the_token() {
        let store = ChallengeStore::new(TestEnv::new());
        let (token, issued) = store.issue(None, None, None);

        assert_eq!(store.consume(&token), Some(issued));
        assert!(store.consume(&token).is_none());
        assert!(store.retrieve(&token).is_none());
    }

    #[test]
    fn consume_rejects_expired_tokens_and_garbage() {
        let env = TestEnv::new();
        let store = ChallengeStore::new(env.clone());
        let (token, _) = store.issue(None, None, None);

        env.advance_secs(CHALLENGE_TTL_SECS + 1);
        assert!(store.consume(&token).is_none());
        assert!(store.consume("!!!not-base64!!!").is_none());
    }

    #[test]
    fn concurrent_consumers_redeem_a_token_exactly_once() {
        // Of any number of racing redeemers, one wins; there is no window
        // between validation and consumption for a second to slip through.
        let store = ChallengeStore::new(TestEnv::new());
        let (token, _) = store.issue(None, None, None);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let token = token.clone();
                std::thread::spawn(move || store.consume(&token).is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|redeemed| *redeemed)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn cleared_token_cannot_be_retrieved_again() {
        let store = ChallengeStore::new(TestEnv::new());
        let (token, _) = store.issue(None, None, None);

        assert!(store.retrieve(&token).is_some());
        store.clear(&token);
        assert!(store.retrieve(&token).is_none());
    }

    #[test]
    fn clear_is_idempotent_and_ignores_garbage() {
        let store = ChallengeStore::new(TestEnv::new());
        let (token, _) = store.issue(None, None, None);

        store.clear(&token);
        store.clear(&token);
        store.clear("garbage");
        assert!(store.retrieve(&token).is_none());
    }

    #[test]
    fn clearing_one_token_does_not_affect_another() {
        // Supersession model: tokens are independent; consuming one never
        // validates or invalidates a sibling.
        let store = ChallengeStore::new(TestEnv::new());
        let (first, _) = store.issue(None, None, None);
        let (second, _) = store.issue(None, None, None);

        store.clear(&first);
        assert!(store.retrieve(&first).is_none());
        assert!(store.retrieve(&second).is_some());
    }

    #[test]
    fn consumed_set_is_purged_after_expiry() {
        let env = TestEnv::new();
        let store = ChallengeStore::new(env.clone());

        let (token, _) = store.issue(None, None, None);
        store.clear(&token);
        assert_eq!(store.lock_consumed().len(), 1);

        env.advance_secs(CHALLENGE_TTL_SECS + 2);
        let _ = store.retrieve("anything");
        assert_eq!(store.lock_consumed().len(), 0);
    }

    #[test]
    fn challenges_are_unique_per_issue() {
        let store = ChallengeStore::new(TestEnv::new());
        let (_, a) = store.issue(None, None, None);
        let (_, b) = store.issue(None, None, None);
        assert_ne!(a.challenge, b.challenge);
    }
}
