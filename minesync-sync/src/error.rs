//! Error types for the sync layer.

use std::time::Duration;
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failures of a single call to the remote save/load endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The caller-supplied timeout expired and the request was aborted.
    #[error("request timed out")]
    Timeout,

    /// Non-success HTTP status.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Server-side rate limiting (HTTP 429 or `TOO_MANY_REQUESTS`).
    #[error("too many requests")]
    TooManyRequests { retry_after: Option<Duration> },

    /// The server is still processing an earlier save for this user.
    #[error("save already in progress")]
    SaveInProgress,

    /// The server refused the save for a non-transient reason.
    #[error("save rejected: {0}")]
    Rejected(String),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Returns true for server-side throttling signals. These are handled
    /// server-side and never grow the client backoff.
    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            RemoteError::TooManyRequests { .. } | RemoteError::SaveInProgress
        )
    }

    /// Returns true if the failure is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Timeout | RemoteError::Network(_) => true,
            RemoteError::Server { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Maps a server error code string onto a throttling variant.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "TOO_MANY_REQUESTS" => Some(RemoteError::TooManyRequests { retry_after: None }),
            "SAVE_IN_PROGRESS" => Some(RemoteError::SaveInProgress),
            _ => None,
        }
    }
}

/// Errors surfaced by the save/load pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The candidate document failed integrity checks. Never retried.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Local durable write rejected after eviction and one retry.
    #[error("local storage quota exceeded")]
    QuotaExceeded,

    /// Remote call failed at the network level.
    #[error("network error: {0}")]
    Network(String),

    /// Remote call timed out.
    #[error("operation timed out")]
    Timeout,

    /// Server-side rate limiting.
    #[error("too many requests")]
    TooManyRequests,

    /// Server still busy with an earlier save.
    #[error("save already in progress")]
    SaveInProgress,

    /// Neither the local nor the remote candidate is usable.
    #[error("no valid local or remote state")]
    ConflictUnresolvable,

    /// Any other local storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The save task panicked or was cancelled by runtime shutdown.
    #[error("save task aborted: {0}")]
    Aborted(String),
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Timeout => SyncError::Timeout,
            RemoteError::TooManyRequests { .. } => SyncError::TooManyRequests,
            RemoteError::SaveInProgress => SyncError::SaveInProgress,
            other => SyncError::Network(other.to_string()),
        }
    }
}

impl From<minesync_storage::StorageError> for SyncError {
    fn from(e: minesync_storage::StorageError) -> Self {
        if e.is_quota() {
            SyncError::QuotaExceeded
        } else {
            SyncError::Storage(e.to_string())
        }
    }
}
