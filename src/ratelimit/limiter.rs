//! Core rate limiter implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::memory::MemoryStore;
use super::policy::RateLimitConfig;
use super::redis_store::{RedisStore, DEFAULT_STORE_TIMEOUT};
use super::store::CounterStore;
use super::window::Window;
use crate::config::StoreConfig;
use crate::error::{LimiterError, Result};

/// Default pause before the shared store is tried again after a failure.
const DEFAULT_STORE_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome of one rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    /// Whether the attempt is admitted
    pub success: bool,
    /// Attempts left in the current window
    pub remaining: u32,
    /// The configured limit
    pub limit: u32,
    /// When the current window ends
    pub reset: DateTime<Utc>,
}

impl RateLimitResult {
    /// Evaluate a post-increment count against a policy.
    pub fn from_count(config: &RateLimitConfig, window: &Window, count: u64) -> Self {
        let limit = config.limit();
        let remaining = u64::from(limit).saturating_sub(count);
        Self {
            success: count <= u64::from(limit),
            // remaining <= limit, so this always fits
            remaining: u32::try_from(remaining).unwrap_or(limit),
            limit,
            reset: window.reset_at(),
        }
    }

    /// Whole seconds until the window resets, at least one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Fixed window rate limiter.
///
/// The algorithm runs against a shared store when one is configured and
/// otherwise against the in-process store. Shared store failures are logged
/// and the check is answered from the in-process store instead, so a check
/// never fails. After a failure the shared store is skipped until the backoff
/// has elapsed, so an unresponsive store costs one timeout per backoff period
/// rather than one per check.
pub struct RateLimiter {
    /// In-process counters, always available
    local: Arc<MemoryStore>,
    /// Shared counters, when configured
    remote: Option<Arc<dyn CounterStore>>,
    /// Time budget for one shared store call
    store_timeout: Duration,
    /// Pause after a shared store failure
    store_backoff: Duration,
    /// Clock millis before which the shared store is skipped
    remote_retry_at_ms: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter backed only by the process-wide in-memory store.
    pub fn new() -> Self {
        Self::with_stores(MemoryStore::shared(), None)
    }

    /// Create a limiter from explicit stores.
    pub fn with_stores(local: Arc<MemoryStore>, remote: Option<Arc<dyn CounterStore>>) -> Self {
        Self {
            local,
            remote,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            store_backoff: DEFAULT_STORE_BACKOFF,
            remote_retry_at_ms: AtomicU64::new(0),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a limiter from store configuration.
    ///
    /// The shared store is used only when both URL and credential are set.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let remote: Option<Arc<dyn CounterStore>> = match config.redis_credentials() {
            Some((url, token)) => {
                let store = RedisStore::connect(url, token, config.key_prefix.clone())?
                    .with_timeout(timeout);
                debug!(prefix = %config.key_prefix, "Using redis counter store");
                Some(Arc::new(store))
            }
            None => {
                debug!("No shared store configured, using in-memory counters");
                None
            }
        };

        Ok(Self::with_stores(MemoryStore::shared(), remote)
            .with_store_timeout(timeout)
            .with_store_backoff(Duration::from_millis(config.retry_backoff_ms)))
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the shared store time budget.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Replace the pause after a shared store failure.
    pub fn with_store_backoff(mut self, backoff: Duration) -> Self {
        self.store_backoff = backoff;
        self
    }

    /// Name of the backend asynchronous checks are routed to.
    pub fn backend_name(&self) -> &'static str {
        self.remote
            .as_ref()
            .map(|remote| remote.name())
            .unwrap_or_else(|| self.local.name())
    }

    /// The in-process store.
    pub fn local_store(&self) -> &Arc<MemoryStore> {
        &self.local
    }

    /// Record an attempt for `key` and decide whether it is admitted.
    ///
    /// Routed through the shared store when configured. Never fails: shared
    /// store errors and timeouts fall back to the in-process store.
    pub async fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let window = self.current_window(config);

        if let Some(remote) = self.available_remote() {
            match self.with_timeout(remote.increment(key, &window)).await {
                Ok(count) => return self.decide(key, config, &window, count),
                Err(e) => {
                    self.back_off();
                    warn!(
                        key = %key,
                        backend = remote.name(),
                        error = %e,
                        backoff_ms = self.store_backoff.as_millis() as u64,
                        "Shared rate limit store unavailable, falling back to in-memory counters"
                    );
                }
            }
        }

        let count = self.local.increment_sync(key, &window);
        self.decide(key, config, &window, count)
    }

    /// Record an attempt against the in-process store only.
    pub fn check_sync(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let window = self.current_window(config);
        let count = self.local.increment_sync(key, &window);
        self.decide(key, config, &window, count)
    }

    /// Current count for `key` in the active window, without recording an attempt.
    pub async fn peek(&self, key: &str, config: &RateLimitConfig) -> u64 {
        let window = self.current_window(config);

        if let Some(remote) = self.available_remote() {
            match self.with_timeout(remote.get(key, &window)).await {
                Ok(count) => return count,
                Err(e) => {
                    self.back_off();
                    warn!(key = %key, error = %e, "Shared rate limit store unavailable for peek");
                }
            }
        }

        self.local.get_sync(key, &window)
    }

    /// Drop expired in-process records.
    pub fn purge_expired(&self) -> usize {
        self.local.purge_expired(self.clock.now_millis())
    }

    /// The shared store, unless it is configured out or backing off.
    fn available_remote(&self) -> Option<&Arc<dyn CounterStore>> {
        let remote = self.remote.as_ref()?;
        let retry_at = self.remote_retry_at_ms.load(Ordering::Acquire);
        if self.clock.now_millis() < retry_at {
            trace!(retry_at, "Shared rate limit store backing off");
            return None;
        }
        Some(remote)
    }

    fn back_off(&self) {
        let retry_at = self
            .clock
            .now_millis()
            .saturating_add(self.store_backoff.as_millis() as u64);
        self.remote_retry_at_ms.fetch_max(retry_at, Ordering::AcqRel);
    }

    fn current_window(&self, config: &RateLimitConfig) -> Window {
        Window::containing(self.clock.now_millis(), config.window_secs())
    }

    async fn with_timeout<T>(&self, call: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LimiterError::StoreTimeout(self.store_timeout.as_millis() as u64)),
        }
    }

    fn decide(
        &self,
        key: &str,
        config: &RateLimitConfig,
        window: &Window,
        count: u64,
    ) -> RateLimitResult {
        let result = RateLimitResult::from_count(config, window, count);

        trace!(
            key = %key,
            count,
            limit = config.limit(),
            window = window.id(),
            "Checked rate limit"
        );

        if !result.success {
            debug!(key = %key, count, limit = config.limit(), "Rate limit exceeded");
        }

        result
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.backend_name())
            .field("store_timeout", &self.store_timeout)
            .field("store_backoff", &self.store_backoff)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use async_trait::async_trait;

    /// A shared store that is always down.
    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn increment(&self, _key: &str, _window: &Window) -> Result<u64> {
            Err(LimiterError::Store(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }

        async fn get(&self, _key: &str, _window: &Window) -> Result<u64> {
            Err(LimiterError::Store(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }

        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    /// A shared store that never answers.
    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn increment(&self, _key: &str, _window: &Window) -> Result<u64> {
            std::future::pending().await
        }

        async fn get(&self, _key: &str, _window: &Window) -> Result<u64> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    /// A shared store that never answers and counts how often it is asked.
    #[derive(Default)]
    struct CountingHangingStore {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl CounterStore for CountingHangingStore {
        async fn increment(&self, _key: &str, _window: &Window) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn get(&self, _key: &str, _window: &Window) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "counting-hanging"
        }
    }

    fn local_limiter(clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::with_stores(Arc::new(MemoryStore::new()), None).with_clock(clock)
    }

    #[test]
    fn test_first_calls_decrement_remaining() {
        let limiter = local_limiter(Arc::new(ManualClock::new(0)));
        let config = RateLimitConfig::new(5, 60).unwrap();

        let first = limiter.check_sync("k1", &config);
        assert!(first.success);
        assert_eq!(first.remaining, 4);
        assert_eq!(first.limit, 5);

        let second = limiter.check_sync("k1", &config);
        assert!(second.success);
        assert_eq!(second.remaining, 3);
    }

    #[test]
    fn test_call_past_limit_is_rejected() {
        let limiter = local_limiter(Arc::new(ManualClock::new(0)));
        let config = RateLimitConfig::new(2, 60).unwrap();

        assert!(limiter.check_sync("k2", &config).success);
        assert!(limiter.check_sync("k2", &config).success);

        let third = limiter.check_sync("k2", &config);
        assert!(!third.success);
        assert_eq!(third.remaining, 0);
    }

    #[test]
    fn test_remaining_decreases_to_zero_and_stays_there() {
        let limiter = local_limiter(Arc::new(ManualClock::new(0)));
        let config = RateLimitConfig::REGISTER;

        let remaining: Vec<u32> = (0..6)
            .map(|_| limiter.check_sync("register:10.0.0.1", &config).remaining)
            .collect();
        assert_eq!(remaining, vec![2, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_keys_do_not_share_quota() {
        let limiter = local_limiter(Arc::new(ManualClock::new(0)));
        let config = RateLimitConfig::new(1, 60).unwrap();

        assert!(limiter.check_sync("auth:a", &config).success);
        assert!(!limiter.check_sync("auth:a", &config).success);
        assert!(limiter.check_sync("auth:b", &config).success);
    }

    #[test]
    fn test_window_elapse_resets_counter() {
        let clock = Arc::new(ManualClock::new(10_000));
        let limiter = local_limiter(clock.clone());
        let config = RateLimitConfig::AUTH;

        for _ in 0..6 {
            limiter.check_sync("k", &config);
        }
        assert!(!limiter.check_sync("k", &config).success);

        clock.advance_secs(60);

        let fresh = limiter.check_sync("k", &config);
        assert!(fresh.success);
        assert_eq!(fresh.remaining, config.limit() - 1);
    }

    #[test]
    fn test_reset_is_window_end() {
        let limiter = local_limiter(Arc::new(ManualClock::new(90_500)));
        let result = limiter.check_sync("k", &RateLimitConfig::API);

        assert_eq!(result.reset.timestamp_millis(), 120_000);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = local_limiter(Arc::new(ManualClock::new(90_500)));
        let result = limiter.check_sync("k", &RateLimitConfig::API);
        let now = DateTime::<Utc>::from_timestamp_millis(90_500).unwrap();

        assert_eq!(result.retry_after_secs(now), 30);
        assert_eq!(result.retry_after_secs(result.reset), 1);
    }

    #[tokio::test]
    async fn test_async_check_without_shared_store_uses_local() {
        let limiter = local_limiter(Arc::new(ManualClock::new(0)));
        let config = RateLimitConfig::new(2, 60).unwrap();

        assert_eq!(limiter.backend_name(), "memory");
        assert_eq!(limiter.check("k", &config).await.remaining, 1);
        // Sync and async checks share the in-process counters.
        assert_eq!(limiter.check_sync("k", &config).remaining, 0);
        assert!(!limiter.check("k", &config).await.success);
    }

    #[tokio::test]
    async fn test_unreachable_shared_store_falls_back() {
        let local = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::with_stores(local.clone(), Some(Arc::new(UnreachableStore)))
            .with_clock(Arc::new(ManualClock::new(0)));
        let config = RateLimitConfig::new(2, 60).unwrap();

        let first = limiter.check("k", &config).await;
        assert!(first.success);
        assert_eq!(first.remaining, 1);
        assert_eq!(local.len(), 1);

        limiter.check("k", &config).await;
        let third = limiter.check("k", &config).await;
        assert!(!third.success);
        assert_eq!(third.remaining, 0);
    }

    #[tokio::test]
    async fn test_hanging_shared_store_times_out_and_falls_back() {
        let limiter = RateLimiter::with_stores(Arc::new(MemoryStore::new()), Some(Arc::new(HangingStore)))
            .with_store_timeout(Duration::from_millis(20))
            .with_clock(Arc::new(ManualClock::new(0)));

        let result = limiter.check("k", &RateLimitConfig::AUTH).await;
        assert!(result.success);
        assert_eq!(result.remaining, 4);
        assert_eq!(limiter.peek("k", &RateLimitConfig::AUTH).await, 1);
    }

    #[tokio::test]
    async fn test_failed_shared_store_is_skipped_until_backoff_elapses() {
        let clock = Arc::new(ManualClock::new(0));
        let remote = Arc::new(CountingHangingStore::default());
        let limiter = RateLimiter::with_stores(Arc::new(MemoryStore::new()), Some(remote.clone()))
            .with_store_timeout(Duration::from_millis(20))
            .with_store_backoff(Duration::from_secs(5))
            .with_clock(clock.clone());
        let config = RateLimitConfig::API;

        assert!(limiter.check("k", &config).await.success);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

        // Answered locally without waiting on the store again.
        for expected in [98, 97, 96] {
            assert_eq!(limiter.check("k", &config).await.remaining, expected);
        }
        assert_eq!(limiter.peek("k", &config).await, 4);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

        clock.advance_millis(4_999);
        limiter.check("k", &config).await;
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

        clock.advance_millis(1);
        limiter.check("k", &config).await;
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_real_redis_client_at_closed_port_falls_back() {
        let store = StoreConfig {
            redis_url: Some("redis://127.0.0.1:1".to_string()),
            redis_token: Some("secret".to_string()),
            ..StoreConfig::default()
        };
        let limiter = RateLimiter::from_config(&store)
            .unwrap()
            .with_clock(Arc::new(ManualClock::new(0)));
        assert_eq!(limiter.backend_name(), "redis");

        let result = limiter.check("fallback:closed-port", &RateLimitConfig::AUTH).await;
        assert!(result.success);
        assert_eq!(result.limit, 5);
    }

    #[tokio::test]
    async fn test_shared_store_is_used_when_healthy() {
        let remote = Arc::new(MemoryStore::new());
        let local = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::with_stores(local.clone(), Some(remote.clone()))
            .with_clock(Arc::new(ManualClock::new(0)));

        limiter.check("k", &RateLimitConfig::AUTH).await;

        assert_eq!(remote.len(), 1);
        assert!(local.is_empty());
        assert_eq!(limiter.peek("k", &RateLimitConfig::AUTH).await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(local_limiter(Arc::new(ManualClock::new(0))));
        let config = RateLimitConfig::new(10, 60).unwrap();

        let tasks = (0..50).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check("burst", &config).await })
        });
        let results = futures::future::join_all(tasks).await;

        let admitted = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|r| r.success)
            .count();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_purge_expired_uses_clock() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = local_limiter(clock.clone());
        limiter.check_sync("k", &RateLimitConfig::AUTH);

        assert_eq!(limiter.purge_expired(), 0);
        clock.advance_secs(61);
        assert_eq!(limiter.purge_expired(), 1);
        assert!(limiter.local_store().is_empty());
    }
}
