//! Structural and range checks on candidate documents.
//!
//! Every check runs and every violation is collected, so a caller can log a
//! complete diagnosis of a bad candidate in one line. Validation is pure: no
//! I/O, no clock, no shared state.

use crate::{GameStateDocument, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Outcome of validating one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Converts a failed report into [`crate::Error::Invalid`].
    pub fn into_result(self) -> crate::Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(crate::Error::Invalid(self.errors))
        }
    }
}

/// Checks candidate documents against the persistence invariants.
///
/// Numeric leaves of the payload are resource counters and must be finite and
/// non-negative. Fields that legitimately go negative can be exempted by name
/// with [`IntegrityValidator::allow_signed`].
#[derive(Debug, Clone, Default)]
pub struct IntegrityValidator {
    signed_fields: HashSet<String>,
}

impl IntegrityValidator {
    /// Creates a validator with no exemptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exempts a payload field name from the non-negative rule.
    #[must_use]
    pub fn allow_signed(mut self, field: impl Into<String>) -> Self {
        self.signed_fields.insert(field.into());
        self
    }

    /// Validates a typed document.
    #[must_use]
    pub fn validate(&self, doc: &GameStateDocument) -> IntegrityReport {
        let mut errors = Vec::new();
        if doc.payload.is_null() {
            errors.push("missing required field: payload".to_string());
        } else {
            self.check_payload(&doc.payload, &mut errors);
        }
        if doc.version == 0 {
            errors.push("version must be a positive integer, got 0".to_string());
        }
        if doc.user_id.is_blank() {
            errors.push("userId must not be empty".to_string());
        }
        IntegrityReport::from_errors(errors)
    }

    /// Validates a typed document and additionally requires it to belong to
    /// `expected`.
    #[must_use]
    pub fn validate_for(&self, doc: &GameStateDocument, expected: &UserId) -> IntegrityReport {
        let mut report = self.validate(doc);
        if !doc.user_id.is_blank() && &doc.user_id != expected {
            report.errors.push(format!(
                "userId mismatch: document belongs to {}, requested {}",
                doc.user_id, expected
            ));
            report.valid = false;
        }
        report
    }

    /// Validates an untyped candidate, e.g. a raw server response.
    #[must_use]
    pub fn validate_value(&self, value: &Value) -> IntegrityReport {
        let Some(fields) = value.as_object() else {
            return IntegrityReport::from_errors(vec!["document must be an object".to_string()]);
        };

        let mut errors = Vec::new();
        for required in ["payload", "userId", "version"] {
            if fields.get(required).is_none_or(Value::is_null) {
                errors.push(format!("missing required field: {required}"));
            }
        }

        if let Some(payload) = fields.get("payload").filter(|p| !p.is_null()) {
            self.check_payload(payload, &mut errors);
        }

        if let Some(version) = fields.get("version").filter(|v| !v.is_null()) {
            match version.as_u64() {
                Some(v) if v >= 1 => {}
                _ => errors.push(format!("version must be a positive integer, got {version}")),
            }
        }

        if let Some(user) = fields.get("userId").filter(|v| !v.is_null()) {
            match user.as_str() {
                Some(s) if !s.trim().is_empty() => {}
                Some(_) => errors.push("userId must not be empty".to_string()),
                None => errors.push(format!("userId must be a string, got {user}")),
            }
        }

        IntegrityReport::from_errors(errors)
    }

    fn check_payload(&self, payload: &Value, errors: &mut Vec<String>) {
        if !payload.is_object() {
            errors.push("payload must be an object".to_string());
            return;
        }
        let mut path = String::from("payload");
        self.check_numbers(&mut path, None, payload, errors);
    }

    fn check_numbers(
        &self,
        path: &mut String,
        field: Option<&str>,
        value: &Value,
        errors: &mut Vec<String>,
    ) {
        match value {
            Value::Number(n) => {
                let signed_ok = field.is_some_and(|f| self.signed_fields.contains(f));
                match n.as_f64() {
                    Some(f) if !f.is_finite() => errors.push(format!("{path} is not finite")),
                    Some(f) if f < 0.0 && !signed_ok => {
                        errors.push(format!("{path} is negative ({n})"));
                    }
                    Some(_) => {}
                    None => errors.push(format!("{path} is not a representable number")),
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    let len = path.len();
                    path.push('.');
                    path.push_str(key);
                    self.check_numbers(path, Some(key), child, errors);
                    path.truncate(len);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    let len = path.len();
                    path.push_str(&format!("[{i}]"));
                    // Elements inherit the exemption of the array's field.
                    self.check_numbers(path, field, child, errors);
                    path.truncate(len);
                }
            }
            _ => {}
        }
    }
}

/// Validates with the default rules. Shorthand for
/// `IntegrityValidator::default().validate(doc)`.
#[must_use]
pub fn validate(doc: &GameStateDocument) -> IntegrityReport {
    IntegrityValidator::default().validate(doc)
}
