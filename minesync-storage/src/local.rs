//! Size-routed document store over the two local tiers.

use crate::backup::BackupRotator;
use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::tier::{AsyncTier, SyncTier, TierKind};
use minesync_types::{keys, EpochMillis, GameStateDocument};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a local write failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageFailure {
    /// The synchronous tier stayed full after one eviction pass.
    Quota,
    Serialization(String),
    Io(String),
}

/// Result of [`LocalTierStore::write`]. Writes never return `Err`; a caller
/// inspects the outcome instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOutcome {
    Written { tier: TierKind, bytes: u64 },
    Failed { reason: StorageFailure },
}

impl StorageOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, StorageOutcome::Written { .. })
    }

    #[must_use]
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            StorageOutcome::Failed {
                reason: StorageFailure::Quota
            }
        )
    }
}

/// Hybrid-mode metadata kept at `<key>_meta` in the synchronous tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierMeta {
    pub last_saved: String,
    pub version: u64,
    pub size: u64,
    pub tier: TierKind,
}

/// Reads and writes documents, routing each to a tier by serialized size.
pub struct LocalTierStore {
    sync_tier: Arc<dyn SyncTier>,
    async_tier: Arc<dyn AsyncTier>,
    rotator: Arc<BackupRotator>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
}

impl LocalTierStore {
    pub fn new(
        sync_tier: Arc<dyn SyncTier>,
        async_tier: Arc<dyn AsyncTier>,
        rotator: Arc<BackupRotator>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> Self {
        Self {
            sync_tier,
            async_tier,
            rotator,
            clock,
            config,
        }
    }

    /// Returns the rotator used for quota relief.
    pub fn rotator(&self) -> &Arc<BackupRotator> {
        &self.rotator
    }

    /// Persists `doc` under `key`.
    ///
    /// Documents up to the size threshold go to the synchronous tier, larger
    /// ones to the asynchronous tier. A copy left in the other tier by an
    /// earlier write is removed so reads never see stale data.
    pub async fn write(&self, key: &str, doc: &GameStateDocument) -> StorageOutcome {
        let json = match serde_json::to_string(doc) {
            Ok(json) => json,
            Err(e) => {
                return StorageOutcome::Failed {
                    reason: StorageFailure::Serialization(e.to_string()),
                };
            }
        };
        let bytes = json.len() as u64;

        let tier = if bytes <= self.config.size_threshold_bytes {
            match self.set_with_relief(key, &json) {
                Ok(()) => {}
                Err(e) if e.is_quota() => {
                    warn!("Local write of {} failed after eviction: {}", key, e);
                    return StorageOutcome::Failed {
                        reason: StorageFailure::Quota,
                    };
                }
                Err(e) => {
                    return StorageOutcome::Failed {
                        reason: StorageFailure::Io(e.to_string()),
                    };
                }
            }
            if let Err(e) = self.async_tier.delete(key).await {
                warn!("Failed to drop stale large-object copy of {}: {}", key, e);
            }
            TierKind::Sync
        } else {
            if let Err(e) = self.async_tier.put(key, json.as_bytes()).await {
                return StorageOutcome::Failed {
                    reason: StorageFailure::Io(e.to_string()),
                };
            }
            if let Err(e) = self.sync_tier.remove(key) {
                warn!("Failed to drop stale small-object copy of {}: {}", key, e);
            }
            TierKind::Async
        };

        if self.config.hybrid {
            self.write_meta(key, doc, bytes, tier);
        }

        debug!("Stored {} ({} bytes) in {:?} tier", key, bytes, tier);
        StorageOutcome::Written { tier, bytes }
    }

    /// Writes to the synchronous tier, running one emergency eviction and a
    /// single retry if the tier is full.
    fn set_with_relief(&self, key: &str, value: &str) -> StorageResult<()> {
        match self.sync_tier.set(key, value) {
            Err(e) if e.is_quota() => {
                warn!("Quota exceeded writing {}, evicting and retrying once", key);
                self.rotator.emergency_evict();
                self.sync_tier.set(key, value)
            }
            other => other,
        }
    }

    fn write_meta(&self, key: &str, doc: &GameStateDocument, size: u64, tier: TierKind) {
        let meta = TierMeta {
            last_saved: doc
                .last_saved
                .clone()
                .unwrap_or_else(|| self.clock.now().to_rfc3339()),
            version: doc.version,
            size,
            tier,
        };
        let result = serde_json::to_string(&meta)
            .map_err(StorageError::from)
            .and_then(|json| self.set_with_relief(&keys::meta(key), &json));
        if let Err(e) = result {
            warn!("Failed to write metadata for {}: {}", key, e);
        }
    }

    /// Reads the document stored under `key`.
    ///
    /// Missing, unreadable and corrupted records all yield `None`; the cause
    /// is logged.
    pub async fn read(&self, key: &str) -> Option<GameStateDocument> {
        match self.try_read(key).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Discarding record {}: {}", key, e);
                None
            }
        }
    }

    /// Like [`Self::read`], but reports a record that exists and cannot be
    /// decoded as [`StorageError::Corrupted`].
    pub async fn try_read(&self, key: &str) -> StorageResult<Option<GameStateDocument>> {
        let prefer_async = self
            .metadata(key)
            .is_some_and(|m| m.tier == TierKind::Async);

        let raw = if prefer_async {
            match self.read_async(key).await {
                Some(raw) => Some(raw),
                None => self.read_sync(key),
            }
        } else {
            match self.read_sync(key) {
                Some(raw) => Some(raw),
                None => self.read_async(key).await,
            }
        };
        let Some(raw) = raw else {
            return Ok(None);
        };

        GameStateDocument::from_json(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupted {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn read_sync(&self, key: &str) -> Option<String> {
        match self.sync_tier.get(key) {
            Ok(v) => v,
            Err(e) => {
                warn!("Small-object read of {} failed: {}", key, e);
                None
            }
        }
    }

    async fn read_async(&self, key: &str) -> Option<String> {
        match self.async_tier.get(key).await {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("Large-object record {} is not UTF-8: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Large-object read of {} failed: {}", key, e);
                None
            }
        }
    }

    /// Removes `key` from both tiers along with its metadata.
    pub async fn remove(&self, key: &str) -> StorageResult<()> {
        self.sync_tier.remove(key)?;
        self.sync_tier.remove(&keys::meta(key))?;
        self.async_tier.delete(key).await
    }

    /// Size in bytes of the stored record, or 0 if absent.
    pub async fn size_of(&self, key: &str) -> u64 {
        if let Some(meta) = self.metadata(key) {
            return meta.size;
        }
        if let Some(raw) = self.read_sync(key) {
            return raw.len() as u64;
        }
        match self.async_tier.size_of(key).await {
            Ok(size) => size.unwrap_or(0),
            Err(e) => {
                warn!("Large-object size lookup of {} failed: {}", key, e);
                0
            }
        }
    }

    /// Hybrid-mode metadata for `key`, read from the synchronous tier only.
    pub fn metadata(&self, key: &str) -> Option<TierMeta> {
        let raw = self.read_sync(&keys::meta(key))?;
        serde_json::from_str(&raw).ok()
    }

    /// Fast existence check that never touches the asynchronous tier.
    pub fn exists(&self, key: &str) -> bool {
        self.metadata(key).is_some() || self.read_sync(key).is_some()
    }

    /// Last time the record was durably written, from metadata.
    pub fn last_saved(&self, key: &str) -> Option<EpochMillis> {
        self.metadata(key)
            .and_then(|m| EpochMillis::parse_rfc3339(&m.last_saved))
    }
}
