//! Process-wide limiter for call sites that do not carry their own.

use std::sync::OnceLock;

use tracing::{info, warn};

use super::limiter::{RateLimitResult, RateLimiter};
use super::policy::RateLimitConfig;
use crate::config::StoreConfig;

static GLOBAL: OnceLock<RateLimiter> = OnceLock::new();

/// The process-wide limiter, built from `LIMITER__STORE__*` on first use.
///
/// A missing or unusable shared store configuration yields an in-memory
/// limiter rather than an error.
pub fn global_limiter() -> &'static RateLimiter {
    GLOBAL.get_or_init(|| {
        let store = StoreConfig::from_env();
        match RateLimiter::from_config(&store) {
            Ok(limiter) => {
                info!(backend = limiter.backend_name(), "Global rate limiter initialized");
                limiter
            }
            Err(e) => {
                warn!(error = %e, "Invalid shared store configuration, using in-memory counters");
                RateLimiter::new()
            }
        }
    })
}

/// Check `key` against `config` on the process-wide limiter.
pub async fn check(key: &str, config: &RateLimitConfig) -> RateLimitResult {
    global_limiter().check(key, config).await
}

/// Check `key` against `config` on the process-wide in-memory counters.
pub fn check_sync(key: &str, config: &RateLimitConfig) -> RateLimitResult {
    global_limiter().check_sync(key, config)
}
