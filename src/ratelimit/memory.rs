//! In-process counter store.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::store::CounterStore;
use super::window::Window;
use crate::error::Result;

/// Records are tracked per key and window length, so policies with different
/// windows never reset each other's counts.
type RecordKey = (String, u64);

/// Counter state for one key and window length.
#[derive(Debug, Clone, Copy)]
struct WindowRecord {
    /// The window this count belongs to
    window: Window,
    /// Attempts seen in that window
    count: u64,
}

/// Per-process counter map.
///
/// Each key's increment runs under its map-entry lock, so increments for one
/// key are totally ordered while distinct keys never contend. Counts are lost
/// on restart and are not shared with other processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<RecordKey, WindowRecord>,
}

fn record_key(key: &str, window: &Window) -> RecordKey {
    (key.to_string(), window.duration_ms())
}

static SHARED: OnceLock<Arc<MemoryStore>> = OnceLock::new();

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store, created on first use.
    pub fn shared() -> Arc<MemoryStore> {
        SHARED.get_or_init(|| Arc::new(MemoryStore::new())).clone()
    }

    /// Add one attempt and return the count for the active window.
    ///
    /// A record left over from an earlier window is reset first.
    pub fn increment_sync(&self, key: &str, window: &Window) -> u64 {
        let mut record = self
            .records
            .entry(record_key(key, window))
            .or_insert_with(|| {
                debug!(
                    key = %key,
                    window = window.id(),
                    window_ms = window.duration_ms(),
                    "Creating new rate limit record"
                );
                WindowRecord {
                    window: *window,
                    count: 0,
                }
            });

        if record.window != *window {
            trace!(
                key = %key,
                previous = record.window.id(),
                current = window.id(),
                "Window rolled over, resetting count"
            );
            record.window = *window;
            record.count = 0;
        }

        record.count += 1;
        record.count
    }

    /// Count for `key` in `window`; zero when the record belongs to another window.
    pub fn get_sync(&self, key: &str, window: &Window) -> u64 {
        self.records
            .get(&record_key(key, window))
            .filter(|record| record.window == *window)
            .map(|record| record.count)
            .unwrap_or(0)
    }

    /// Drop every record whose window has ended, returning how many went.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.window.has_ended(now_ms));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged, remaining = self.records.len(), "Purged expired rate limit records");
        }
        purged
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: &Window) -> Result<u64> {
        Ok(self.increment_sync(key, window))
    }

    async fn get(&self, key: &str, window: &Window) -> Result<u64> {
        Ok(self.get_sync(key, window))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
