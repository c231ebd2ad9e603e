//! Physical storage tiers.
//!
//! Two backends sit under the local store:
//! - a synchronous small-object tier with a byte quota (browser
//!   `localStorage` in the original deployment)
//! - an asynchronous large-object tier without a practical quota (IndexedDB)
//!
//! Both are string-keyed. Keys are scanned by prefix for cleanup, so tiers
//! must return every live key from `keys()`.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use tokio::sync::RwLock;

/// Which tier holds a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Sync,
    Async,
}

/// Byte usage of a quota-limited tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

impl StorageUsage {
    /// Fraction of the quota in use, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.quota_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.quota_bytes as f64).clamp(0.0, 1.0)
    }

    #[must_use]
    pub fn available(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.used_bytes)
    }
}

/// Synchronous small-object tier.
///
/// Writes complete before returning, which is what makes it usable from an
/// unload handler.
pub trait SyncTier: Send + Sync {
    /// Returns the name of the backend.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores a value. Fails with [`StorageError::QuotaExceeded`] when the
    /// write does not fit.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Lists all keys currently stored.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Reports current usage against the quota.
    fn usage(&self) -> StorageUsage;
}

/// Asynchronous large-object tier.
#[async_trait]
pub trait AsyncTier: Send + Sync {
    /// Returns the name of the backend.
    fn name(&self) -> &'static str;

    async fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Size in bytes of the stored value, if present.
    async fn size_of(&self, key: &str) -> StorageResult<Option<u64>>;

    async fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Default quota of the in-memory small-object tier (5 MiB, matching common
/// browser `localStorage` limits).
pub const DEFAULT_SYNC_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// In-memory synchronous tier with a byte quota.
///
/// An entry costs `key.len() + value.len()` bytes.
#[derive(Debug)]
pub struct MemorySyncTier {
    quota_bytes: u64,
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySyncTier {
    #[must_use]
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            quota_bytes,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn entry_cost(key: &str, value: &str) -> u64 {
        (key.len() + value.len()) as u64
    }

    fn used(entries: &BTreeMap<String, String>) -> u64 {
        entries.iter().map(|(k, v)| Self::entry_cost(k, v)).sum()
    }
}

impl Default for MemorySyncTier {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_QUOTA_BYTES)
    }
}

impl SyncTier for MemorySyncTier {
    fn name(&self) -> &'static str {
        "memory-sync"
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let used = Self::used(&entries);
        let replaced = entries
            .get(key)
            .map_or(0, |old| Self::entry_cost(key, old));
        let needed = Self::entry_cost(key, value);
        let available = self.quota_bytes.saturating_sub(used - replaced);
        if needed > available {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed,
                available,
            });
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.keys().cloned().collect())
    }

    fn usage(&self) -> StorageUsage {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        StorageUsage {
            used_bytes: Self::used(&entries),
            quota_bytes: self.quota_bytes,
        }
    }
}

/// In-memory asynchronous tier.
#[derive(Debug, Default)]
pub struct MemoryAsyncTier {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryAsyncTier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AsyncTier for MemoryAsyncTier {
    fn name(&self) -> &'static str {
        "memory-async"
    }

    async fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn size_of(&self, key: &str) -> StorageResult<Option<u64>> {
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .map(|v| v.len() as u64))
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
