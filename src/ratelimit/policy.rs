//! Rate limit policies and the named presets used across the platform.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};

/// Quota for one call site: at most `limit` attempts per `window_secs`.
///
/// Both values are positive; construction through [`RateLimitConfig::new`]
/// rejects zeros, and the presets are checked constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    limit: u32,
    #[serde(rename = "windowInSeconds")]
    window_secs: u64,
}

impl RateLimitConfig {
    /// Login attempts.
    pub const AUTH: Self = Self::preset(5, 60);
    /// Account registration.
    pub const REGISTER: Self = Self::preset(3, 60);
    /// General API traffic.
    pub const API: Self = Self::preset(100, 60);
    /// Password reset requests.
    pub const PASSWORD_RESET: Self = Self::preset(3, 3600);

    const fn preset(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    /// Create a policy, rejecting a zero limit or window.
    pub fn new(limit: u32, window_secs: u64) -> Result<Self> {
        if limit == 0 {
            return Err(LimiterError::Config(
                "rate limit must be greater than zero".to_string(),
            ));
        }
        if window_secs == 0 {
            return Err(LimiterError::Config(
                "rate limit window must be greater than zero".to_string(),
            ));
        }
        Ok(Self { limit, window_secs })
    }

    /// Maximum admitted attempts per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length in seconds.
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }
}

impl<'de> Deserialize<'de> for RateLimitConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            limit: u32,
            window_in_seconds: u64,
        }

        let raw = Raw::deserialize(deserializer)?;
        RateLimitConfig::new(raw.limit, raw.window_in_seconds).map_err(serde::de::Error::custom)
    }
}

/// The platform's named policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Preset {
    Auth,
    Register,
    Api,
    PasswordReset,
}

impl Preset {
    /// Every preset, in table order.
    pub const ALL: [Preset; 4] = [
        Preset::Auth,
        Preset::Register,
        Preset::Api,
        Preset::PasswordReset,
    ];

    /// The policy behind this preset.
    pub fn config(&self) -> RateLimitConfig {
        match self {
            Preset::Auth => RateLimitConfig::AUTH,
            Preset::Register => RateLimitConfig::REGISTER,
            Preset::Api => RateLimitConfig::API,
            Preset::PasswordReset => RateLimitConfig::PASSWORD_RESET,
        }
    }

    /// Name used in configuration and request bodies.
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Auth => "auth",
            Preset::Register => "register",
            Preset::Api => "api",
            Preset::PasswordReset => "passwordReset",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| LimiterError::Config(format!("unknown rate limit preset: {}", s)))
    }
}
