//! Sync engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between automatic push cycles
    pub push_interval_secs: u64,

    /// Seconds between automatic pull cycles
    pub pull_interval_secs: u64,

    /// Max outbox entries per push batch
    pub batch_size: usize,

    /// Max transactions per pull page
    pub page_size: usize,

    /// Per-request timeout (ms) for aggregator calls
    pub request_timeout_ms: u64,

    /// Initial retry delay (ms) after a transient push failure
    pub initial_backoff_ms: u64,

    /// Retry delay cap (ms)
    pub max_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            // Community mesh links are slow and flaky; sync is unhurried
            push_interval_secs: 30,
            pull_interval_secs: 60,
            batch_size: 100,
            page_size: 200,
            request_timeout_ms: 5_000,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
        }
    }
}

impl SyncConfig {
    /// Push interval as a Duration
    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }

    /// Pull interval as a Duration
    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }

    /// Request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Initial backoff as a Duration
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Backoff cap as a Duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Load from TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        let config: SyncConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the client cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 || self.page_size == 0 {
            return Err(crate::Error::Config(
                "batch_size and page_size must be positive".to_string(),
            ));
        }
        if self.initial_backoff_ms == 0 || self.max_backoff_ms < self.initial_backoff_ms {
            return Err(crate::Error::Config(
                "backoff window must be positive and max >= initial".to_string(),
            ));
        }
        Ok(())
    }
}
