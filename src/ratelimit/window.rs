//! Fixed window arithmetic.

use chrono::{DateTime, TimeZone, Utc};

/// One discrete, non-overlapping counting window.
///
/// All attempts whose timestamp falls in `[start, end)` share one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    id: u64,
    duration_ms: u64,
}

impl Window {
    /// The window of `window_secs` length containing `now_ms`.
    ///
    /// `window_secs` must be positive; `RateLimitConfig` guarantees it.
    pub fn containing(now_ms: u64, window_secs: u64) -> Self {
        let duration_ms = window_secs.saturating_mul(1000).max(1);
        Self {
            id: now_ms / duration_ms,
            duration_ms,
        }
    }

    /// Window identifier: `floor(now / duration)`.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Window length in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Window length in whole seconds.
    pub fn duration_secs(&self) -> u64 {
        self.duration_ms / 1000
    }

    /// Start of the window, epoch milliseconds.
    pub fn start_ms(&self) -> u64 {
        self.id * self.duration_ms
    }

    /// End of the window (exclusive), epoch milliseconds.
    pub fn end_ms(&self) -> u64 {
        self.start_ms() + self.duration_ms
    }

    /// Whether `now_ms` is past this window.
    pub fn has_ended(&self, now_ms: u64) -> bool {
        now_ms >= self.end_ms()
    }

    /// The window end as a timestamp, reported to callers as the reset time.
    pub fn reset_at(&self) -> DateTime<Utc> {
        let end = i64::try_from(self.end_ms()).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(end)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
