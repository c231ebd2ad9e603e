//! Sync engine configuration.

use minesync_storage::{env_parse, StoreConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time-distance thresholds used when reconciling a local and a remote
/// candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictPolicy {
    /// Local lead up to which local is trusted as fresh offline progress.
    pub trusted_lead_ms: u64,
    /// Trusted local wins with a lead below this recommend a merge.
    pub merge_window_ms: u64,
    /// Local leads beyond this are treated as clock skew; remote wins.
    pub max_local_lead_ms: u64,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            trusted_lead_ms: 30 * 60 * 1000,
            merge_window_ms: 24 * 60 * 60 * 1000,
            max_local_lead_ms: 48 * 60 * 60 * 1000,
        }
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum gap after a successful save before a manual save may run.
    pub min_save_interval_ms: u64,
    /// Minimum gap after a successful save before an auto save may run.
    pub auto_save_interval_ms: u64,
    /// First retry delay grows from this value.
    pub initial_backoff_ms: u64,
    /// Retry delay ceiling.
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Automatic retries after the first attempt of a logical save.
    pub max_retry_attempts: u32,
    /// Fixed re-queue delay after a throttling response.
    pub throttle_requeue_ms: u64,
    /// Consecutive autosave failures before the user is told.
    pub persistent_failure_threshold: u32,
    pub conflict: ConflictPolicy,
    pub storage: StoreConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_save_interval_ms: 5_000,
            auto_save_interval_ms: 15_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 1.5,
            max_retry_attempts: 2,
            throttle_requeue_ms: 2_000,
            persistent_failure_threshold: 3,
            conflict: ConflictPolicy::default(),
            storage: StoreConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `MIN_SAVE_INTERVAL`, `AUTO_SAVE_INTERVAL`,
    /// `INITIAL_BACKOFF`, `MAX_BACKOFF` and `MAX_RETRY_ATTEMPTS`, plus the
    /// storage variables read by [`StoreConfig::from_env`].
    pub fn from_env() -> Self {
        let mut config = Self {
            storage: StoreConfig::from_env(),
            ..Self::default()
        };
        if let Some(v) = env_parse("MIN_SAVE_INTERVAL") {
            config.min_save_interval_ms = v;
        }
        if let Some(v) = env_parse("AUTO_SAVE_INTERVAL") {
            config.auto_save_interval_ms = v;
        }
        if let Some(v) = env_parse("INITIAL_BACKOFF") {
            config.initial_backoff_ms = v;
        }
        if let Some(v) = env_parse("MAX_BACKOFF") {
            config.max_backoff_ms = v;
        }
        if let Some(v) = env_parse("MAX_RETRY_ATTEMPTS") {
            config.max_retry_attempts = v;
        }
        config
    }

    pub fn min_save_interval(&self) -> Duration {
        Duration::from_millis(self.min_save_interval_ms)
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_millis(self.auto_save_interval_ms)
    }

    pub fn throttle_requeue(&self) -> Duration {
        Duration::from_millis(self.throttle_requeue_ms)
    }
}
