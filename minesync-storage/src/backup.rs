//! Timestamped backup snapshots with two-tier eviction.
//!
//! Normal operation keeps the newest `max_backup_copies` snapshots per user
//! and never deletes a user's most recent one. When the synchronous tier
//! crosses the emergency threshold, every user is cut down to a single
//! backup and transient cache keys are flushed. Eviction is a stateless
//! scan-and-delete over key names, so running it twice (or from two tabs)
//! is harmless.

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::tier::SyncTier;
use minesync_types::{keys, EpochMillis, GameStateDocument, SaveReason, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// One stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub key: String,
    pub user_id: UserId,
    /// When the snapshot was taken.
    pub timestamp: EpochMillis,
    pub version: u64,
    /// `lastModified` of the snapshotted document.
    #[serde(default)]
    pub last_modified: EpochMillis,
    pub payload: Value,
    #[serde(default)]
    pub is_minimal: bool,
}

impl BackupRecord {
    fn capture(key: String, doc: &GameStateDocument, timestamp: EpochMillis) -> Self {
        Self {
            key,
            user_id: doc.user_id.clone(),
            timestamp,
            version: doc.version,
            last_modified: doc.last_modified,
            payload: doc.payload.clone(),
            is_minimal: doc.is_minimal,
        }
    }

    /// Rebuilds the document this record was taken from.
    #[must_use]
    pub fn into_document(self) -> GameStateDocument {
        let last_modified = if self.last_modified.as_millis() > 0 {
            self.last_modified
        } else {
            self.timestamp
        };
        GameStateDocument {
            user_id: self.user_id,
            version: self.version,
            last_modified,
            last_saved: Some(self.timestamp.to_rfc3339()),
            payload: self.payload,
            save_reason: SaveReason::Auto,
            is_minimal: self.is_minimal,
        }
    }
}

/// Bookkeeping stored at `backup_<userId>_meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMeta {
    pub latest_key: String,
    pub count: usize,
    pub last_backup: EpochMillis,
    pub version: u64,
}

/// What an emergency eviction pass removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    pub removed_keys: Vec<String>,
    pub usage_before: f64,
    pub usage_after: f64,
}

impl EvictionReport {
    #[must_use]
    pub fn removed(&self) -> usize {
        self.removed_keys.len()
    }
}

/// Writes snapshots and enforces retention.
pub struct BackupRotator {
    tier: Arc<dyn SyncTier>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    /// Last stamp handed out, so two snapshots in one millisecond get
    /// distinct keys.
    last_stamp: Mutex<u64>,
}

impl BackupRotator {
    pub fn new(tier: Arc<dyn SyncTier>, clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        Self {
            tier,
            clock,
            config,
            last_stamp: Mutex::new(0),
        }
    }

    /// Returns the retention configured for normal operation.
    pub fn max_keep(&self) -> usize {
        self.config.max_backup_copies.max(1)
    }

    fn next_stamp(&self) -> EpochMillis {
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now().as_millis().max(*last + 1);
        *last = now;
        EpochMillis::new(now)
    }

    /// Writes a timestamped snapshot of `doc` and rotates old ones out.
    ///
    /// On quota exhaustion an emergency eviction runs and the write is retried;
    /// if the full record still does not fit a minimal record is written
    /// instead. Returns the key of the stored snapshot.
    pub fn snapshot(&self, user: &UserId, doc: &GameStateDocument) -> StorageResult<String> {
        let ts = self.next_stamp();
        let key = keys::backup(user, ts);
        self.write_with_fallback(&key, doc, ts)?;

        self.prune(user, self.max_keep())?;
        self.write_meta(user, &key, ts, doc.version);

        if self.usage_ratio() > self.config.emergency_threshold {
            self.emergency_evict();
        }
        debug!("Snapshot {} (version {})", key, doc.version);
        Ok(key)
    }

    /// Writes the unload-time record `backup_<userId>_latest`.
    pub fn snapshot_latest(&self, user: &UserId, doc: &GameStateDocument) -> StorageResult<String> {
        let ts = self.next_stamp();
        let key = keys::backup_latest(user);
        self.write_with_fallback(&key, doc, ts)?;
        Ok(key)
    }

    fn write_with_fallback(
        &self,
        key: &str,
        doc: &GameStateDocument,
        ts: EpochMillis,
    ) -> StorageResult<()> {
        let record = BackupRecord::capture(key.to_string(), doc, ts);
        match self.write_record(&record) {
            Err(e) if e.is_quota() => {
                warn!("Backup {} hit quota, running emergency eviction", key);
                self.emergency_evict();
            }
            other => return other,
        }
        match self.write_record(&record) {
            Err(e) if e.is_quota() && !doc.is_minimal => {
                warn!("Backup {} still over quota, writing minimal record", key);
                let minimal = BackupRecord::capture(key.to_string(), &doc.minimal(), ts);
                self.write_record(&minimal)
            }
            other => other,
        }
    }

    fn write_record(&self, record: &BackupRecord) -> StorageResult<()> {
        let json = serde_json::to_string(record)?;
        self.tier.set(&record.key, &json)
    }

    fn write_meta(&self, user: &UserId, latest_key: &str, ts: EpochMillis, version: u64) {
        let meta = BackupMeta {
            latest_key: latest_key.to_string(),
            count: self.timestamped_keys(user).map_or(0, |k| k.len()),
            last_backup: ts,
            version,
        };
        let result = serde_json::to_string(&meta)
            .map_err(StorageError::from)
            .and_then(|json| self.tier.set(&keys::backup_meta(user), &json));
        if let Err(e) = result {
            warn!("Failed to write backup meta for {}: {}", user, e);
        }
    }

    /// Reads the rotation bookkeeping record for `user`.
    pub fn meta(&self, user: &UserId) -> Option<BackupMeta> {
        let raw = self.tier.get(&keys::backup_meta(user)).ok()??;
        serde_json::from_str(&raw).ok()
    }

    /// Timestamped backup keys for `user`, oldest first.
    fn timestamped_keys(&self, user: &UserId) -> StorageResult<Vec<(EpochMillis, String)>> {
        let prefix = keys::backup_prefix(user);
        let mut found: Vec<(EpochMillis, String)> = self
            .tier
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .filter_map(|k| match keys::parse_backup(&k) {
                Some((owner, ts)) if &owner == user => Some((ts, k)),
                _ => None,
            })
            .collect();
        found.sort();
        Ok(found)
    }

    /// Deletes all but the newest `max_keep` timestamped backups of `user`.
    ///
    /// `max_keep` is raised to 1: the most recent backup is never pruned.
    /// Returns the number of records removed.
    pub fn prune(&self, user: &UserId, max_keep: usize) -> StorageResult<usize> {
        let found = self.timestamped_keys(user)?;
        let keep = max_keep.max(1);
        let excess = found.len().saturating_sub(keep);
        for (_, key) in &found[..excess] {
            self.tier.remove(key)?;
            debug!("Pruned backup {}", key);
        }
        Ok(excess)
    }

    /// Number of timestamped backups currently held for `user`.
    pub fn count(&self, user: &UserId) -> usize {
        self.timestamped_keys(user).map_or(0, |k| k.len())
    }

    /// Returns the newest backup of `user`, considering both timestamped
    /// snapshots and the unload record. Unreadable records are skipped.
    pub fn latest(&self, user: &UserId) -> Option<BackupRecord> {
        let mut candidates: Vec<String> = self
            .timestamped_keys(user)
            .unwrap_or_default()
            .into_iter()
            .rev()
            .map(|(_, k)| k)
            .collect();
        candidates.push(keys::backup_latest(user));

        candidates
            .iter()
            .filter_map(|key| self.read_record(key))
            .filter(|record| &record.user_id == user)
            .max_by_key(|record| record.timestamp)
    }

    fn read_record(&self, key: &str) -> Option<BackupRecord> {
        let raw = match self.tier.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read backup {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping corrupted backup {}: {}", key, e);
                None
            }
        }
    }

    /// Fraction of the synchronous tier's quota in use.
    pub fn usage_ratio(&self) -> f64 {
        self.tier.usage().ratio()
    }

    /// Runs [`Self::emergency_evict`] if usage is above the threshold.
    pub fn evict_if_needed(&self) -> Option<EvictionReport> {
        if self.usage_ratio() > self.config.emergency_threshold {
            Some(self.emergency_evict())
        } else {
            None
        }
    }

    /// Reduces every user to a single backup and deletes transient keys.
    ///
    /// For each user the newest record among the timestamped snapshots and
    /// the unload record survives.
    pub fn emergency_evict(&self) -> EvictionReport {
        let usage_before = self.usage_ratio();
        let mut report = EvictionReport {
            usage_before,
            ..Default::default()
        };

        let all_keys = match self.tier.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Emergency eviction could not list keys: {}", e);
                report.usage_after = usage_before;
                return report;
            }
        };

        let mut per_user: BTreeMap<UserId, Vec<(EpochMillis, String)>> = BTreeMap::new();
        for key in &all_keys {
            if let Some((owner, ts)) = keys::parse_backup(key) {
                per_user.entry(owner).or_default().push((ts, key.clone()));
            } else if let Some(owner) = keys::backup_owner(key) {
                // `_meta` records are bookkeeping and never count as a backup.
                if key.ends_with(keys::LATEST_SUFFIX) {
                    if let Some(record) = self.read_record(key) {
                        per_user
                            .entry(owner)
                            .or_default()
                            .push((record.timestamp, key.clone()));
                    }
                }
            } else if self.is_transient(key) {
                self.remove_logged(key, &mut report);
            }
        }

        for records in per_user.values_mut() {
            records.sort();
            let excess = records.len().saturating_sub(1);
            for (_, key) in &records[..excess] {
                self.remove_logged(key, &mut report);
            }
        }

        report.usage_after = self.usage_ratio();
        info!(
            "Emergency eviction removed {} keys, usage {:.1}% -> {:.1}%",
            report.removed(),
            report.usage_before * 100.0,
            report.usage_after * 100.0
        );
        report
    }

    fn is_transient(&self, key: &str) -> bool {
        if key.starts_with(keys::GAME_STATE_PREFIX) || key.starts_with(keys::BACKUP_PREFIX) {
            return false;
        }
        self.config
            .transient_patterns
            .iter()
            .any(|p| key.contains(p.as_str()))
    }

    fn remove_logged(&self, key: &str, report: &mut EvictionReport) {
        match self.tier.remove(key) {
            Ok(()) => report.removed_keys.push(key.to_string()),
            Err(e) => warn!("Failed to evict {}: {}", key, e),
        }
    }
}
