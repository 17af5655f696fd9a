//! Counter store trait for abstracting local and shared backends.

use async_trait::async_trait;

use super::window::Window;
use crate::error::Result;

/// Storage capability the fixed window algorithm runs against.
///
/// Implementations own expiry: a counter for `(key, window)` must stop
/// counting once the window has ended, either through a native TTL or an
/// explicit comparison against the window start.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one attempt for `key` in `window` and return the new count.
    async fn increment(&self, key: &str, window: &Window) -> Result<u64>;

    /// Current count for `key` in `window` without incrementing.
    async fn get(&self, key: &str, window: &Window) -> Result<u64>;

    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;
}
