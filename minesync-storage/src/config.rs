//! Local storage configuration.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Configuration shared by [`crate::LocalTierStore`] and
/// [`crate::BackupRotator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Serialized documents up to this size go to the synchronous tier.
    pub size_threshold_bytes: u64,
    /// Keep a `<key>_meta` record in the synchronous tier for every write.
    pub hybrid: bool,
    /// Timestamped backups kept per user under normal operation.
    pub max_backup_copies: usize,
    /// Usage ratio above which emergency eviction runs.
    pub emergency_threshold: f64,
    /// Substrings marking transient keys that emergency eviction deletes.
    pub transient_patterns: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            size_threshold_bytes: 300 * 1024,
            hybrid: true,
            max_backup_copies: 3,
            emergency_threshold: 0.8,
            transient_patterns: vec![
                "cache_".to_string(),
                "temp_".to_string(),
                "_cache".to_string(),
            ],
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `MAX_BACKUP_COPIES`,
    /// `STORAGE_EMERGENCY_THRESHOLD` and `STORAGE_SIZE_THRESHOLD`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse::<usize>("MAX_BACKUP_COPIES") {
            config.max_backup_copies = v.max(1);
        }
        if let Some(v) = env_parse::<f64>("STORAGE_EMERGENCY_THRESHOLD") {
            if (0.0..=1.0).contains(&v) {
                config.emergency_threshold = v;
            } else {
                warn!("Ignoring STORAGE_EMERGENCY_THRESHOLD={v}: must be within 0..=1");
            }
        }
        if let Some(v) = env_parse::<u64>("STORAGE_SIZE_THRESHOLD") {
            config.size_threshold_bytes = v;
        }
        config
    }
}

/// Reads and parses an environment variable, warning on malformed values.
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring malformed {name}={raw:?}");
            None
        }
    }
}
