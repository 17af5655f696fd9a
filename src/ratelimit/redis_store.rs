//! Redis-backed counter store shared across processes.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, IntoConnectionInfo, Script};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use super::store::CounterStore;
use super::window::Window;
use crate::error::{LimiterError, Result};

/// Increments the window counter and arms its expiry in one round trip.
///
/// Running INCR and EXPIRE inside a script keeps the pair atomic, so a
/// counter can never be left without a TTL between the two calls.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if redis.call('TTL', KEYS[1]) < 0 then
  redis.call('EXPIRE', KEYS[1], tonumber(ARGV[1]))
end
return count
"#;

/// Default key prefix for counters.
pub const DEFAULT_KEY_PREFIX: &str = "practice:ratelimit";

/// Default time budget for connecting and for each command.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Counter store backed by Redis.
///
/// Counters are keyed per window length and window, and expire through
/// Redis' own TTL. The connection manager is created on first use and
/// reconnects by itself after connection errors and response timeouts.
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
    script: Script,
    timeout: Duration,
    manager: OnceCell<ConnectionManager>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Create a store for the given client.
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            script: Script::new(INCREMENT_SCRIPT),
            timeout: DEFAULT_STORE_TIMEOUT,
            manager: OnceCell::new(),
        }
    }

    /// Create a store from a connection URL and credential.
    ///
    /// The credential is applied as the Redis password. No connection is made
    /// until the first counter operation.
    pub fn connect(url: &str, token: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let mut info = url
            .into_connection_info()
            .map_err(|e| LimiterError::Config(format!("invalid redis url: {}", e)))?;
        if !token.is_empty() {
            info.redis.password = Some(token.to_string());
        }
        let client = redis::Client::open(info)?;
        Ok(Self::new(client, key_prefix))
    }

    /// Replace the connect and per-command time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The Redis key for a counter in a given window.
    pub fn key_for(&self, key: &str, window: &Window) -> String {
        format!(
            "{}:{}:{}s:{}",
            self.key_prefix,
            key,
            window.duration_secs(),
            window.id()
        )
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                debug!(prefix = %self.key_prefix, "Opening redis connection manager");
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.timeout)
                    .set_response_timeout(self.timeout)
                    .set_number_of_retries(1);
                ConnectionManager::new_with_config(self.client.clone(), config).await
            })
            .await?;
        Ok(manager.clone())
    }

    /// Bound a whole store call, connection setup included.
    async fn bounded<T>(&self, call: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LimiterError::StoreTimeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: &Window) -> Result<u64> {
        let redis_key = self.key_for(key, window);
        let ttl_secs = window.duration_secs().max(1);

        let count: u64 = self
            .bounded(async {
                let mut connection = self.connection().await?;
                let count: u64 = self
                    .script
                    .key(&redis_key)
                    .arg(ttl_secs)
                    .invoke_async(&mut connection)
                    .await?;
                Ok::<_, LimiterError>(count)
            })
            .await?;

        trace!(key = %redis_key, count, "Incremented redis counter");
        Ok(count)
    }

    async fn get(&self, key: &str, window: &Window) -> Result<u64> {
        let redis_key = self.key_for(key, window);

        self.bounded(async {
            let mut connection = self.connection().await?;
            let count: Option<u64> = connection.get(&redis_key).await?;
            Ok::<_, LimiterError>(count.unwrap_or(0))
        })
        .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
