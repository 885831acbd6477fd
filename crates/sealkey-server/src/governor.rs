//! Attempt governor: sliding-window rate limiting plus escalating lockout.
//!
//! Two independent brakes on authentication attempts:
//!
//! - A sliding window caps how many ceremonies a key (user or address) may
//!   start per window, regardless of outcome. A rejected probe is NOT
//!   recorded, so hammering a rate-limited endpoint never extends the
//!   limit.
//! - A failure ladder tracks consecutive verification failures. Three
//!   failures warn, five lock, and each further failure doubles the
//!   lockout duration up to a cap. A successful ceremony clears the
//!   ladder.
//!
//! Counter state lives behind [`CounterStore`] so deployments can back it
//! with shared storage; the in-process [`MemoryCounters`] is the default.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory counter state only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use sealkey_core::Environment;

/// Timestamped counter storage for the governor.
///
/// Stores per-key lists of event timestamps (wall-clock seconds). Must be
/// Clone + Send + Sync; implementations share state via Arc.
pub trait CounterStore: Clone + Send + Sync + 'static {
    /// Record an event for a key at the given wall-clock second.
    fn record(&self, key: &str, timestamp_secs: u64);

    /// All recorded timestamps for a key at or after `since_secs`,
    /// in recording order.
    fn timestamps_since(&self, key: &str, since_secs: u64) -> Vec<u64>;

    /// Drop timestamps recorded before `before_secs`. Keeps state bounded.
    fn prune(&self, key: &str, before_secs: u64);

    /// Remove all state for a key.
    fn reset(&self, key: &str);
}

/// In-memory counter store.
///
/// Thread-safe through Mutex; `lock().expect()` panics on poison, which is
/// acceptable here since no code path panics while holding the lock.
#[derive(Clone, Default)]
pub struct MemoryCounters {
    inner: Arc<Mutex<HashMap<String, Vec<u64>>>>,
}

impl MemoryCounters {
    /// Create a new empty counter store.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u64>>> {
        self.inner.lock().expect("Mutex poisoned")
    }
}

impl CounterStore for MemoryCounters {
    fn record(&self, key: &str, timestamp_secs: u64) {
        self.lock().entry(key.to_string()).or_default().push(timestamp_secs);
    }

    fn timestamps_since(&self, key: &str, since_secs: u64) -> Vec<u64> {
        self.lock()
            .get(key)
            .map(|stamps| stamps.iter().copied().filter(|ts| *ts >= since_secs).collect())
            .unwrap_or_default()
    }

    fn prune(&self, key: &str, before_secs: u64) {
        let mut inner = self.lock();
        if let Some(stamps) = inner.get_mut(key) {
            stamps.retain(|ts| *ts >= before_secs);
            if stamps.is_empty() {
                inner.remove(key);
            }
        }
    }

    fn reset(&self, key: &str) {
        self.lock().remove(key);
    }
}

/// Governor tuning knobs.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Attempts allowed per sliding window.
    pub window_limit: u32,
    /// Sliding window length in seconds.
    pub window_secs: u64,
    /// Failures before the state reports `Warned`.
    pub warn_after: u32,
    /// Failures before the state reports `Locked`.
    pub lock_after: u32,
    /// First lockout duration; doubles with each further failure.
    pub base_lockout_secs: u64,
    /// Upper bound on the doubled lockout duration.
    pub max_lockout_secs: u64,
    /// Failures older than this no longer count toward the ladder.
    pub failure_horizon_secs: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            window_limit: 10,
            window_secs: 60,
            warn_after: 3,
            lock_after: 5,
            base_lockout_secs: 60,
            max_lockout_secs: 3600,
            failure_horizon_secs: 86_400,
        }
    }
}

/// Outcome of a sliding-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the attempt may proceed.
    pub allowed: bool,
    /// Seconds until a retry can succeed, when not allowed. Always
    /// positive when present.
    pub retry_after_secs: Option<u64>,
}

/// Failure-ladder state for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutState {
    /// Below the warning threshold.
    Normal,
    /// At or past the warning threshold but not locked.
    Warned {
        /// Failures currently on the ladder.
        failures: u32,
    },
    /// Locked out until the given delay elapses.
    Locked {
        /// Seconds until attempts are accepted again. Always positive.
        retry_after_secs: u64,
    },
}

/// Sliding-window rate limiter and escalating lockout tracker.
///
/// Clone shares the underlying counter store.
#[derive(Clone)]
pub struct AttemptGovernor<C: CounterStore, E: Environment> {
    counters: C,
    env: E,
    config: GovernorConfig,
}

impl<C: CounterStore, E: Environment> AttemptGovernor<C, E> {
    /// Create a governor over a counter store.
    pub fn new(counters: C, env: E, config: GovernorConfig) -> Self {
        Self { counters, env, config }
    }

    /// Check the sliding window for a key and, if allowed, record the
    /// attempt.
    ///
    /// Exactly `window_limit` attempts pass per window. A rejected attempt
    /// is not recorded, so it cannot push the window further out.
    pub fn check_window(&self, key: &str) -> Decision {
        let now = self.env.wall_clock_secs();
        let window_key = format!("window:{key}");

        // In-window means the timestamp has not yet aged out:
        // ts + window_secs > now.
        let since = now.saturating_sub(self.config.window_secs).saturating_add(1);
        self.counters.prune(&window_key, since);

        let in_window = self.counters.timestamps_since(&window_key, since);
        if in_window.len() >= self.config.window_limit as usize {
            let retry_after = in_window
                .iter()
                .min()
                .map_or(1, |oldest| (oldest + self.config.window_secs).saturating_sub(now).max(1));
            tracing::debug!(key, retry_after_secs = retry_after, "attempt rate-limited");
            return Decision { allowed: false, retry_after_secs: Some(retry_after) };
        }

        self.counters.record(&window_key, now);
        Decision { allowed: true, retry_after_secs: None }
    }

    /// Current failure-ladder state for a key.
    pub fn lockout_state(&self, key: &str) -> LockoutState {
        let now = self.env.wall_clock_secs();
        let failure_key = format!("failures:{key}");

        let since = now.saturating_sub(self.config.failure_horizon_secs);
        self.counters.prune(&failure_key, since);

        let failures = self.counters.timestamps_since(&failure_key, since);
        let count = failures.len() as u32;

        if count >= self.config.lock_after {
            let Some(last) = failures.iter().max().copied() else {
                unreachable!("count >= lock_after implies at least one failure");
            };

            let locked_until = last.saturating_add(self.lockout_duration_secs(count));
            if locked_until > now {
                return LockoutState::Locked { retry_after_secs: locked_until - now };
            }
        }

        if count >= self.config.warn_after {
            return LockoutState::Warned { failures: count };
        }

        LockoutState::Normal
    }

    /// Record a verification failure for a key.
    pub fn record_failure(&self, key: &str) {
        let now = self.env.wall_clock_secs();
        self.counters.record(&format!("failures:{key}"), now);
        tracing::debug!(key, "verification failure recorded");
    }

    /// Record a successful ceremony, clearing the failure ladder.
    ///
    /// Only failures reset; the sliding window keeps counting successful
    /// attempts.
    pub fn record_success(&self, key: &str) {
        self.counters.reset(&format!("failures:{key}"));
    }

    /// Lockout duration for a given failure count: base, doubled for each
    /// failure past the lock threshold, capped.
    fn lockout_duration_secs(&self, failures: u32) -> u64 {
        let extra = failures.saturating_sub(self.config.lock_after).min(32);
        self.config
            .base_lockout_secs
            .checked_shl(extra)
            .unwrap_or(self.config.max_lockout_secs)
            .min(self.config.max_lockout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU64, Ordering},
        time::Duration,
    };

    use super::*;

    #[derive(Clone)]
    struct TestEnv {
        clock_secs: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { clock_secs: Arc::new(AtomicU64::new(1_700_000_000)) }
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
            buffer.fill(0);
        }
    }

    fn governor(env: &TestEnv) -> AttemptGovernor<MemoryCounters, TestEnv> {
        AttemptGovernor::new(MemoryCounters::new(), env.clone(), GovernorConfig::default())
    }

    #[test]
    fn window_allows_exactly_the_limit() {
        let env = TestEnv::new();
        let gov = governor(&env);

        for i in 0..10 {
            assert!(gov.check_window("alice").allowed, "attempt {i} should pass");
        }

        let decision = gov.check_window("alice");
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs.unwrap() > 0);
    }

    #[test]
    fn rejected_attempts_are_not_recorded() {
        let env = TestEnv::new();
        let gov = governor(&env);

        for _ in 0..10 {
            assert!(gov.check_window("alice").allowed);
        }

        // Hammer the limiter; none of these extend the window.
        for _ in 0..50 {
            assert!(!gov.check_window("alice").allowed);
        }

        // Once the original ten attempts age out, the key is usable again.
        env.advance_secs(60);
        assert!(gov.check_window("alice").allowed);
    }

    #[test]
    fn window_slides_rather_than_resets() {
        let env = TestEnv::new();
        let gov = governor(&env);

        // 5 attempts now, 5 more at t+30.
        for _ in 0..5 {
            assert!(gov.check_window("alice").allowed);
        }
        env.advance_secs(30);
        for _ in 0..5 {
            assert!(gov.check_window("alice").allowed);
        }

        assert!(!gov.check_window("alice").allowed);

        // At t+60 the first batch ages out; 5 slots free, not all 10.
        env.advance_secs(30);
        for _ in 0..5 {
            assert!(gov.check_window("alice").allowed);
        }
        assert!(!gov.check_window("alice").allowed);
    }

    #[test]
    fn window_keys_are_independent() {
        let env = TestEnv::new();
        let gov = governor(&env);

        for _ in 0..10 {
            assert!(gov.check_window("alice").allowed);
        }
        assert!(!gov.check_window("alice").allowed);
        assert!(gov.check_window("bob").allowed);
    }

    #[test]
    fn five_failures_lock_with_positive_retry_after() {
        let env = TestEnv::new();
        let gov = governor(&env);

        for _ in 0..4 {
            gov.record_failure("alice");
        }
        assert_eq!(gov.lockout_state("alice"), LockoutState::Warned { failures: 4 });

        gov.record_failure("alice");
        match gov.lockout_state("alice") {
            LockoutState::Locked { retry_after_secs } => assert!(retry_after_secs > 0),
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[test]
    fn warning_starts_at_three_failures() {
        let env = TestEnv::new();
        let gov = governor(&env);

        gov.record_failure("alice");
        gov.record_failure("alice");
        assert_eq!(gov.lockout_state("alice"), LockoutState::Normal);

        gov.record_failure("alice");
        assert_eq!(gov.lockout_state("alice"), LockoutState::Warned { failures: 3 });
    }

    #[test]
    fn lockout_expires_then_doubles_on_next_failure() {
        let env = TestEnv::new();
        let gov = governor(&env);

        for _ in 0..5 {
            gov.record_failure("alice");
        }
        assert_eq!(gov.lockout_state("alice"), LockoutState::Locked { retry_after_secs: 60 });

        // First lockout expires after the base duration.
        env.advance_secs(60);
        assert_eq!(gov.lockout_state("alice"), LockoutState::Warned { failures: 5 });

        // Another failure re-locks for double the duration.
        gov.record_failure("alice");
        assert_eq!(gov.lockout_state("alice"), LockoutState::Locked { retry_after_secs: 120 });
    }

    #[test]
    fn lockout_duration_is_capped() {
        let env = TestEnv::new();
        let gov = governor(&env);

        // Pile on failures far past the threshold, expiring each lock.
        for _ in 0..30 {
            gov.record_failure("alice");
            env.advance_secs(3600);
        }
        gov.record_failure("alice");

        match gov.lockout_state("alice") {
            LockoutState::Locked { retry_after_secs } => assert!(retry_after_secs <= 3600),
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[test]
    fn success_resets_the_failure_ladder() {
        let env = TestEnv::new();
        let gov = governor(&env);

        for _ in 0..5 {
            gov.record_failure("alice");
        }
        assert!(matches!(gov.lockout_state("alice"), LockoutState::Locked { .. }));

        gov.record_success("alice");
        assert_eq!(gov.lockout_state("alice"), LockoutState::Normal);

        // And the ladder starts fresh, not resumed.
        gov.record_failure("alice");
        assert_eq!(gov.lockout_state("alice"), LockoutState::Normal);
    }

    #[test]
    fn success_does_not_reset_the_window() {
        let env = TestEnv::new();
        let gov = governor(&env);

        for _ in 0..10 {
            assert!(gov.check_window("alice").allowed);
        }
        gov.record_success("alice");
        assert!(!gov.check_window("alice").allowed);
    }

    #[test]
    fn failures_age_out_past_the_horizon() {
        let env = TestEnv::new();
        let gov = governor(&env);

        for _ in 0..4 {
            gov.record_failure("alice");
        }
        assert!(matches!(gov.lockout_state("alice"), LockoutState::Warned { .. }));

        env.advance_secs(86_401);
        assert_eq!(gov.lockout_state("alice"), LockoutState::Normal);
    }
}
