//! Configuration management for the limiter service.

use std::net::SocketAddr;
use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::DEFAULT_KEY_PREFIX;

/// Prefix of environment overrides, e.g. `LIMITER__STORE__REDIS_URL`.
pub const ENV_PREFIX: &str = "LIMITER";

/// Main configuration for the limiter service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// In-process store housekeeping
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Guard the service's own routes with a per-client `service` quota
    #[serde(default = "default_self_throttle")]
    pub self_throttle: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            self_throttle: default_self_throttle(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}

fn default_self_throttle() -> bool {
    false
}

/// Shared counter store configuration.
///
/// The shared store is enabled only when both URL and token are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Redis credential
    #[serde(default)]
    pub redis_token: Option<String>,

    /// Namespace for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Time budget for one store call in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// How long to skip the store after it fails, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_token: None,
            key_prefix: default_key_prefix(),
            timeout_ms: default_store_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_retry_backoff_ms() -> u64 {
    5_000
}

impl StoreConfig {
    /// Store settings from the environment alone; defaults when unset or invalid.
    pub fn from_env() -> Self {
        AppConfig::load(None::<&Path>)
            .map(|config| config.store)
            .unwrap_or_default()
    }

    /// URL and token, when both are set and non-empty.
    pub fn redis_credentials(&self) -> Option<(&str, &str)> {
        let url = self.redis_url.as_deref().filter(|v| !v.trim().is_empty())?;
        let token = self.redis_token.as_deref().filter(|v| !v.trim().is_empty())?;
        Some((url, token))
    }
}

/// In-process store housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Seconds between sweeps of expired records
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from an optional YAML file layered under
    /// `LIMITER__*` environment variables.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let path = path.as_ref();
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            return Err(LimiterError::Config(
                "store.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.memory.sweep_interval_secs == 0 {
            return Err(LimiterError::Config(
                "memory.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8088".parse().unwrap());
        assert!(!config.server.self_throttle);
        assert_eq!(config.store.key_prefix, "practice:ratelimit");
        assert_eq!(config.store.timeout_ms, 500);
        assert_eq!(config.store.retry_backoff_ms, 5_000);
        assert_eq!(config.memory.sweep_interval_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_yaml_fills_missing_sections() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
store:
  redis_url: "redis://cache:6379"
  redis_token: "s3cret"
"#;
        let config = assert_ok!(AppConfig::from_yaml(yaml));
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(
            config.store.redis_credentials(),
            Some(("redis://cache:6379", "s3cret"))
        );
        assert_eq!(config.store.timeout_ms, 500);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_self_throttle_is_opt_in() {
        let config = assert_ok!(AppConfig::from_yaml("logging:\n  level: debug\n"));
        assert!(!config.server.self_throttle);

        let yaml = r#"
server:
  self_throttle: true
"#;
        let config = assert_ok!(AppConfig::from_yaml(yaml));
        assert!(config.server.self_throttle);
    }

    #[test]
    fn test_credentials_require_url_and_token() {
        let url_only = StoreConfig {
            redis_url: Some("redis://cache:6379".to_string()),
            ..StoreConfig::default()
        };
        assert!(url_only.redis_credentials().is_none());

        let blank_token = StoreConfig {
            redis_url: Some("redis://cache:6379".to_string()),
            redis_token: Some("  ".to_string()),
            ..StoreConfig::default()
        };
        assert!(blank_token.redis_credentials().is_none());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let yaml = r#"
store:
  timeout_ms: 0
"#;
        assert!(matches!(AppConfig::from_yaml(yaml), Err(LimiterError::Config(_))));
    }
}
