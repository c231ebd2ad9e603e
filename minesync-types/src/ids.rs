//! Identity of the player owning a game state document.
//!
//! The identity is issued elsewhere (a Farcaster fid or an auth subject) and
//! only consumed here, so it is kept as an opaque string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity owning a [`crate::GameStateDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a raw identity without checking it.
    ///
    /// Documents may carry an empty identity; that is reported by the
    /// integrity validator rather than rejected at construction.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses an identity, rejecting empty or whitespace-only input.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.trim().is_empty() {
            return Err(crate::Error::InvalidUserId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identity is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<u64> for UserId {
    fn from(fid: u64) -> Self {
        Self(fid.to_string())
    }
}
