use std::fmt::{Display, Formatter};

use mirrorline_core::{AppError, AppResult};
use serde_json::Value;

/// Dot-separated path into a vendor JSON payload.
///
/// Numeric segments index into arrays, so `items.0.id` selects the id of the
/// first element of `items`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses a validated dot-separated path.
    pub fn new(raw: impl Into<String>) -> AppResult<Self> {
        let raw = raw.into();
        let segments: Vec<String> = raw.split('.').map(str::to_owned).collect();

        if segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(AppError::Validation(format!(
                "field path '{raw}' must not contain empty segments"
            )));
        }

        Ok(Self { raw, segments })
    }

    /// Returns the original path text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    /// Resolves the path against a payload.
    #[must_use]
    pub fn resolve<'a>(&self, payload: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(payload, |current, segment| match current {
                Value::Object(map) => map.get(segment.as_str()),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index)),
                _ => None,
            })
            .filter(|value| !value.is_null())
    }

    /// Resolves the path to a scalar rendered as a string key.
    ///
    /// Vendors use both numeric and string identifiers, so numbers are
    /// accepted and rendered without quotes.
    #[must_use]
    pub fn resolve_key(&self, payload: &Value) -> Option<String> {
        self.resolve(payload).and_then(scalar_key)
    }
}

impl Display for FieldPath {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.raw.as_str())
    }
}

/// Renders a JSON scalar as a string key.
#[must_use]
pub fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
