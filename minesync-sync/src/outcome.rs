//! Request options and the outcomes reported back to callers.

use crate::error::SyncError;
use crate::resolver::Resolution;
use minesync_types::{GameStateDocument, SaveReason};
use std::time::Duration;

/// Options attached to a save request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    pub reason: SaveReason,
    /// Skip the interval gate and flag the remote request as critical.
    pub critical: bool,
    /// Skip the interval gate only.
    pub force: bool,
}

impl SaveOptions {
    pub fn manual() -> Self {
        Self {
            reason: SaveReason::Manual,
            ..Self::default()
        }
    }

    pub fn auto() -> Self {
        Self::default()
    }

    pub fn forced() -> Self {
        Self {
            reason: SaveReason::Manual,
            force: true,
            ..Self::default()
        }
    }

    pub fn critical() -> Self {
        Self {
            reason: SaveReason::Critical,
            critical: true,
            ..Self::default()
        }
    }

    /// True if this request may run regardless of the interval gate.
    pub fn bypasses_interval(&self) -> bool {
        self.force || self.critical || self.reason.bypasses_interval()
    }
}

/// Coarse failure class, for choosing what to tell the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Storage,
    Network,
    Throttling,
    Validation,
}

/// What happened to a save request.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The remote acknowledged the save.
    Saved { version: u64, batched: bool },
    /// A save was already in flight; this state rides on the follow-up.
    Coalesced,
    /// Inside the interval gate; a timer will send it later.
    Deferred { retry_in: Duration },
    /// The server asked us to slow down; re-queued after `retry_in`.
    Throttled { retry_in: Duration, notify: bool },
    /// Unload path: backup written and the send handed off unobserved.
    Dispatched { version: u64 },
    /// The remote acknowledged a save older than one already acknowledged.
    Superseded { version: u64 },
    /// Retries exhausted, a non-retryable error, or a document rejected by
    /// integrity checks before any I/O (`SyncError::Validation`).
    Failed {
        error: SyncError,
        attempts: u32,
        locally_persisted: bool,
        notify: bool,
    },
}

impl SaveOutcome {
    /// Saved, coalesced and superseded requests count as success. A deferral
    /// does not: the caller fired too early and the timer owns the save now.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SaveOutcome::Saved { .. }
                | SaveOutcome::Coalesced
                | SaveOutcome::Dispatched { .. }
                | SaveOutcome::Superseded { .. }
        )
    }

    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            SaveOutcome::Throttled { .. } => Some(FailureCategory::Throttling),
            SaveOutcome::Failed { error, .. } => Some(match error {
                SyncError::Validation(_) => FailureCategory::Validation,
                SyncError::QuotaExceeded | SyncError::Storage(_) | SyncError::Aborted(_) => {
                    FailureCategory::Storage
                }
                SyncError::TooManyRequests | SyncError::SaveInProgress => {
                    FailureCategory::Throttling
                }
                SyncError::Network(_) | SyncError::Timeout | SyncError::ConflictUnresolvable => {
                    FailureCategory::Network
                }
            }),
            _ => None,
        }
    }

    /// Whether the failure is worth surfacing to the player.
    pub fn should_notify(&self) -> bool {
        match self {
            SaveOutcome::Throttled { notify, .. } | SaveOutcome::Failed { notify, .. } => *notify,
            _ => false,
        }
    }
}

/// Where a loaded document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Memory,
    Local,
    Backup,
    Remote,
    Default,
}

/// A loaded document with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub document: GameStateDocument,
    pub source: LoadSource,
    /// Present when local and remote candidates were reconciled.
    pub resolution: Option<Resolution>,
    /// `ConflictUnresolvable` when stored state existed but none of it was
    /// usable and the default document was returned instead.
    pub error: Option<SyncError>,
}
