//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::storage::StorageLocation;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for each remote call (discovery, one calendar's fetch).
    pub fetch_timeout: Duration,

    /// Calendars fetched concurrently within one sync.
    pub max_concurrent_fetches: usize,

    /// Where stores keep their documents.
    pub storage: StorageLocation,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(60),
            max_concurrent_fetches: 4,
            storage: StorageLocation::Memory,
        }
    }
}

impl EngineConfig {
    /// Configuration persisting under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageLocation::Directory(data_dir.into()),
            ..Default::default()
        }
    }

    /// Configuration keeping everything in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Builder: set the per-call deadline.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Builder: set the fetch concurrency (at least 1).
    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }
}
