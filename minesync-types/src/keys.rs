//! Local storage key naming.
//!
//! Cleanup scans keys by prefix and suffix instead of keeping an index, so
//! these formats are load-bearing:
//!
//! - `gameState_<userId>`            working copy
//! - `gameState_<userId>_meta`       hybrid-mode metadata
//! - `backup_<userId>_<timestamp>`   rotating snapshots
//! - `backup_<userId>_latest`        unload-time snapshot
//! - `backup_<userId>_meta`          rotation bookkeeping

use crate::{EpochMillis, UserId};

pub const GAME_STATE_PREFIX: &str = "gameState_";
pub const BACKUP_PREFIX: &str = "backup_";
pub const META_SUFFIX: &str = "_meta";
pub const LATEST_SUFFIX: &str = "_latest";

/// `gameState_<userId>`
#[must_use]
pub fn game_state(user: &UserId) -> String {
    format!("{GAME_STATE_PREFIX}{user}")
}

/// `<key>_meta`
#[must_use]
pub fn meta(key: &str) -> String {
    format!("{key}{META_SUFFIX}")
}

/// `backup_<userId>_`
#[must_use]
pub fn backup_prefix(user: &UserId) -> String {
    format!("{BACKUP_PREFIX}{user}_")
}

/// `backup_<userId>_<timestamp>`
#[must_use]
pub fn backup(user: &UserId, ts: EpochMillis) -> String {
    format!("{BACKUP_PREFIX}{user}_{}", ts.as_millis())
}

/// `backup_<userId>_latest`
#[must_use]
pub fn backup_latest(user: &UserId) -> String {
    format!("{BACKUP_PREFIX}{user}{LATEST_SUFFIX}")
}

/// `backup_<userId>_meta`
#[must_use]
pub fn backup_meta(user: &UserId) -> String {
    format!("{BACKUP_PREFIX}{user}{META_SUFFIX}")
}

/// Splits a timestamped backup key into its user and timestamp.
///
/// The user id may itself contain underscores; the timestamp is always the
/// last segment and must be all digits. `_latest` and `_meta` records are not
/// timestamped backups and yield `None`.
#[must_use]
pub fn parse_backup(key: &str) -> Option<(UserId, EpochMillis)> {
    let rest = key.strip_prefix(BACKUP_PREFIX)?;
    let (user, ts) = rest.rsplit_once('_')?;
    if user.is_empty() || ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let ms = ts.parse::<u64>().ok()?;
    Some((UserId::new(user), EpochMillis::new(ms)))
}

/// Extracts the user from any `backup_<userId>_<suffix>` key, including the
/// `_latest` and `_meta` records.
#[must_use]
pub fn backup_owner(key: &str) -> Option<UserId> {
    if let Some((user, _)) = parse_backup(key) {
        return Some(user);
    }
    let rest = key.strip_prefix(BACKUP_PREFIX)?;
    rest.strip_suffix(LATEST_SUFFIX)
        .or_else(|| rest.strip_suffix(META_SUFFIX))
        .filter(|u| !u.is_empty())
        .map(UserId::new)
}
