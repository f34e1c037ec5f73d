//! Descriptor-supplied payload transforms applied before conflict resolution.

use std::fmt::Debug;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::FieldPath;

/// Rewrites a candidate payload using the currently stored payload.
pub trait PayloadTransform: Send + Sync + Debug {
    /// Returns the payload that should be resolved and stored.
    fn apply(&self, existing: Option<&Value>, candidate: Value, observed_at: DateTime<Utc>)
    -> Value;
}

/// Stamps a target field the first time a status becomes inactive.
///
/// While the status stays inactive the stored stamp is carried forward, and
/// it is cleared when the status returns to an active value. Payloads without
/// a status are left untouched.
#[derive(Debug, Clone)]
pub struct StatusTransitionTimestamp {
    status_path: FieldPath,
    inactive_statuses: Vec<String>,
    target_field: String,
}

impl StatusTransitionTimestamp {
    /// Creates the transform.
    #[must_use]
    pub fn new(
        status_path: FieldPath,
        inactive_statuses: Vec<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self {
            status_path,
            inactive_statuses,
            target_field: target_field.into(),
        }
    }
}

impl PayloadTransform for StatusTransitionTimestamp {
    fn apply(
        &self,
        existing: Option<&Value>,
        mut candidate: Value,
        observed_at: DateTime<Utc>,
    ) -> Value {
        let Some(status) = self
            .status_path
            .resolve(&candidate)
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            return candidate;
        };

        let inactive = self
            .inactive_statuses
            .iter()
            .any(|inactive_status| inactive_status == &status);

        let stamp = if inactive {
            existing
                .and_then(|stored| stored.get(self.target_field.as_str()))
                .filter(|stored| !stored.is_null())
                .cloned()
                .unwrap_or_else(|| {
                    Value::String(observed_at.to_rfc3339_opts(SecondsFormat::Secs, true))
                })
        } else {
            Value::Null
        };

        if let Value::Object(fields) = &mut candidate {
            fields.insert(self.target_field.clone(), stamp);
        }

        candidate
    }
}
