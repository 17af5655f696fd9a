//! Error types for the rate limiting service.

use thiserror::Error;

/// Main error type for limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The shared counter store did not answer in time
    #[error("Counter store timed out after {0}ms")]
    StoreTimeout(u64),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
