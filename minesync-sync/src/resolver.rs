//! Local-versus-remote reconciliation.
//!
//! The policy is deliberately asymmetric. A local candidate that is ahead of
//! the remote is trusted as offline progress up to `max_local_lead_ms`;
//! beyond that the lead is treated as a skewed or manipulated clock and the
//! remote wins. Ties go to the remote.

use crate::config::ConflictPolicy;
use minesync_types::{GameStateDocument, IntegrityValidator, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which candidate to adopt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Remote,
    /// Neither candidate is usable; the caller builds a fresh default.
    None,
}

/// Decision plus the reasoning behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub winner: Winner,
    pub merge_recommended: bool,
    pub reasons: Vec<String>,
}

/// Decides between a local and a remote candidate.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    validator: IntegrityValidator,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            validator: IntegrityValidator::default(),
        }
    }

    /// Uses a custom validator for candidate checks.
    pub fn with_validator(mut self, validator: IntegrityValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn policy(&self) -> &ConflictPolicy {
        &self.policy
    }

    /// Reconciles two optional candidates for `user`.
    pub fn resolve(
        &self,
        local: Option<&GameStateDocument>,
        remote: Option<&GameStateDocument>,
        user: &UserId,
    ) -> Resolution {
        let mut reasons = Vec::new();
        let local = self.accept("local", local, user, &mut reasons);
        let remote = self.accept("remote", remote, user, &mut reasons);

        let resolution = match (local, remote) {
            (None, None) => {
                reasons.push("no valid candidate".to_string());
                Resolution {
                    winner: Winner::None,
                    merge_recommended: false,
                    reasons,
                }
            }
            (Some(_), None) => {
                reasons.push("only local candidate is valid".to_string());
                Resolution {
                    winner: Winner::Local,
                    merge_recommended: false,
                    reasons,
                }
            }
            (None, Some(_)) => {
                reasons.push("only remote candidate is valid".to_string());
                Resolution {
                    winner: Winner::Remote,
                    merge_recommended: false,
                    reasons,
                }
            }
            (Some(local), Some(remote)) => self.by_time_distance(local, remote, reasons),
        };

        debug!(
            "Resolved {} -> {:?} (merge: {}): {}",
            user,
            resolution.winner,
            resolution.merge_recommended,
            resolution.reasons.join("; ")
        );
        resolution
    }

    fn accept<'a>(
        &self,
        label: &str,
        candidate: Option<&'a GameStateDocument>,
        user: &UserId,
        reasons: &mut Vec<String>,
    ) -> Option<&'a GameStateDocument> {
        let doc = candidate?;
        let report = self.validator.validate_for(doc, user);
        if report.valid {
            Some(doc)
        } else {
            reasons.push(format!("{label} rejected: {}", report.errors.join(", ")));
            None
        }
    }

    fn by_time_distance(
        &self,
        local: &GameStateDocument,
        remote: &GameStateDocument,
        mut reasons: Vec<String>,
    ) -> Resolution {
        let delta = local
            .effective_timestamp()
            .delta_millis(&remote.effective_timestamp());

        if delta <= 0 {
            reasons.push(format!("remote is same age or newer by {}ms", -delta));
            return Resolution {
                winner: Winner::Remote,
                merge_recommended: false,
                reasons,
            };
        }

        let lead = delta as u64;
        if lead > self.policy.max_local_lead_ms {
            info!(
                "Local state leads remote by {}ms, beyond {}ms; keeping remote",
                lead, self.policy.max_local_lead_ms
            );
            reasons.push(format!(
                "local leads by {lead}ms, beyond plausible offline window; suspected clock skew"
            ));
            return Resolution {
                winner: Winner::Remote,
                merge_recommended: false,
                reasons,
            };
        }

        let trusted = lead <= self.policy.trusted_lead_ms;
        if trusted {
            reasons.push(format!("local is newer by {lead}ms"));
        } else {
            reasons.push(format!("local is newer by {lead}ms after an offline period"));
        }
        let merge_recommended = trusted && lead < self.policy.merge_window_ms;
        if merge_recommended {
            reasons.push("both candidates recent enough to carry progress".to_string());
        }
        Resolution {
            winner: Winner::Local,
            merge_recommended,
            reasons,
        }
    }
}
