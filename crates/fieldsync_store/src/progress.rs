//! Durable sync progress counters.

use crate::error::StoreResult;
use crate::kv::KeyValueStore;
use fieldsync_events::Timestamp;
use std::sync::Arc;

const PROGRESS_PREFIX: &str = "progress/";
const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

/// Per-stage counters and the last successful sync time.
///
/// Counters survive restarts so a retried stage keeps counting from where
/// it stopped.
#[derive(Clone)]
pub struct SyncProgressCache {
    kv: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SyncProgressCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProgressCache").finish_non_exhaustive()
    }
}

impl SyncProgressCache {
    /// Creates a cache over a key-value store.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Reads the counter of a stage.
    pub fn read_progress(&self, stage_id: &str) -> StoreResult<u64> {
        Ok(self
            .kv
            .get(&format!("{PROGRESS_PREFIX}{stage_id}"))?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Sets the counter of a stage.
    pub fn save_progress(&self, stage_id: &str, value: u64) -> StoreResult<()> {
        self.kv
            .put(&format!("{PROGRESS_PREFIX}{stage_id}"), &value.to_string())
    }

    /// Adds to the counter of a stage and returns the new value.
    pub fn add_progress(&self, stage_id: &str, delta: u64) -> StoreResult<u64> {
        let value = self.kv.update(
            &format!("{PROGRESS_PREFIX}{stage_id}"),
            &mut |current| {
                let current: u64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
                current.saturating_add(delta).to_string()
            },
        )?;
        Ok(value.parse().unwrap_or(0))
    }

    /// Resets every counter.
    pub fn clear_progresses(&self) -> StoreResult<()> {
        self.kv.remove_prefix(PROGRESS_PREFIX)?;
        Ok(())
    }

    /// Records the time of a successful sync.
    pub fn store_last_successful_sync_time(&self, time: Timestamp) -> StoreResult<()> {
        self.kv.put(LAST_SYNC_TIME_KEY, &time.as_millis().to_string())
    }

    /// Returns the time of the last successful sync.
    pub fn read_last_successful_sync_time(&self) -> StoreResult<Option<Timestamp>> {
        Ok(self
            .kv
            .get(LAST_SYNC_TIME_KEY)?
            .and_then(|v| v.parse().ok())
            .map(Timestamp::from_millis))
    }

    /// Forgets the last successful sync time.
    pub fn clear_last_successful_sync_time(&self) -> StoreResult<()> {
        self.kv.remove(LAST_SYNC_TIME_KEY)
    }
}
