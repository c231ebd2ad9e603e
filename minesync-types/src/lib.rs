//! Core type definitions for minesync.
//!
//! This crate defines the types shared by every layer of the persistence
//! engine:
//! - User identity ([`UserId`])
//! - Epoch-millisecond timestamps ([`EpochMillis`])
//! - The persisted aggregate ([`GameStateDocument`]) and its [`SaveReason`]
//! - Local storage key naming ([`keys`])
//! - Structural and range checks on candidate documents ([`integrity`])
//!
//! The game payload itself is opaque here. Game rules (accrual formulas,
//! upgrade costs) live with the collaborator that produces the payload.

mod document;
mod ids;
pub mod integrity;
pub mod keys;
mod timestamp;

pub use document::{GameStateDocument, SaveReason};
pub use ids::UserId;
pub use integrity::{IntegrityReport, IntegrityValidator};
pub use timestamp::EpochMillis;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("invalid document: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
