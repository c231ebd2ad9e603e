//! The persisted game state aggregate.

use crate::{EpochMillis, Error, Result, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Why a save was requested. Drives scheduling priority and backoff policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveReason {
    /// Player-initiated save.
    Manual,
    /// Periodic or event-driven background save.
    #[default]
    Auto,
    /// Page is being torn down.
    BeforeUnload,
    /// Progress that must not wait for the minimum interval.
    Critical,
}

impl SaveReason {
    /// Returns the wire name (`manual`, `auto`, `before_unload`, `critical`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::BeforeUnload => "before_unload",
            Self::Critical => "critical",
        }
    }

    /// Returns true if this reason bypasses the minimum save interval.
    #[must_use]
    pub const fn bypasses_interval(&self) -> bool {
        matches!(self, Self::BeforeUnload | Self::Critical)
    }
}

impl fmt::Display for SaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single persisted aggregate for one player.
///
/// `payload` holds the game fields (inventory, upgrades, stats) and is treated
/// as an opaque JSON record; only the checks in [`crate::integrity`] look
/// inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateDocument {
    /// Owning identity. Immutable after creation.
    pub user_id: UserId,
    /// Incremented on every accepted save. Starts at 1.
    pub version: u64,
    /// Set by the writer at mutation time.
    #[serde(default)]
    pub last_modified: EpochMillis,
    /// Set by the persistence layer on durable write (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<String>,
    /// The game fields.
    pub payload: Value,
    #[serde(default)]
    pub save_reason: SaveReason,
    /// True for reduced-field emergency backups.
    #[serde(default)]
    pub is_minimal: bool,
}

impl GameStateDocument {
    /// Creates a fresh document at version 1, modified now.
    #[must_use]
    pub fn new(user_id: UserId, payload: Value) -> Self {
        Self {
            user_id,
            version: 1,
            last_modified: EpochMillis::now(),
            last_saved: None,
            payload,
            save_reason: SaveReason::Auto,
            is_minimal: false,
        }
    }

    /// Sets `last_modified` explicitly (tests and replay).
    #[must_use]
    pub fn with_last_modified(mut self, ts: EpochMillis) -> Self {
        self.last_modified = ts;
        self
    }

    /// Sets `version` explicitly.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Replaces the payload and marks the document modified now.
    pub fn touch(&mut self, payload: Value) {
        self.payload = payload;
        self.last_modified = EpochMillis::now();
    }

    /// Returns the timestamp used when reconciling candidates.
    ///
    /// Falls back to `last_saved` when the writer never stamped
    /// `last_modified`.
    #[must_use]
    pub fn effective_timestamp(&self) -> EpochMillis {
        if self.last_modified.as_millis() > 0 {
            return self.last_modified;
        }
        self.last_saved
            .as_deref()
            .and_then(EpochMillis::parse_rfc3339)
            .unwrap_or_default()
    }

    /// Builds a reduced copy for emergency backups.
    ///
    /// Only top-level scalar payload fields survive; nested collections are
    /// dropped.
    #[must_use]
    pub fn minimal(&self) -> Self {
        let payload = match &self.payload {
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Object(_) | Value::Array(_)))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<String, Value>>(),
            ),
            Value::Array(_) => Value::Object(Map::new()),
            other => other.clone(),
        };
        Self {
            payload,
            is_minimal: true,
            ..self.clone()
        }
    }

    /// Serializes to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a raw JSON value, running the structural checks first so that a
    /// missing field is reported with every other violation instead of as a
    /// bare deserialization error.
    pub fn from_value(value: Value) -> Result<Self> {
        let report = crate::IntegrityValidator::default().validate_value(&value);
        if !report.valid {
            return Err(Error::Invalid(report.errors));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Parses a JSON string. See [`Self::from_value`].
    pub fn from_json(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_value(value)
    }
}
