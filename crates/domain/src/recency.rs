use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use mirrorline_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FieldPath;

/// How a vendor recency field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyOrdering {
    /// ISO-8601 timestamp compared as an instant.
    IsoTimestamp,
    /// Integer or fractional seconds since the Unix epoch.
    EpochSeconds,
    /// Milliseconds since the Unix epoch.
    EpochMillis,
    /// Monotonic vendor version counter.
    Version,
}

impl RecencyOrdering {
    /// Parses a raw JSON value into a comparable recency value.
    #[must_use]
    pub fn parse(self, value: &Value) -> Option<RecencyValue> {
        match self {
            Self::IsoTimestamp => value
                .as_str()
                .and_then(parse_iso_timestamp)
                .map(RecencyValue::from_datetime),
            Self::EpochSeconds => parse_number(value)
                .and_then(|seconds| scale(seconds, 1_000_000.0))
                .map(RecencyValue),
            Self::EpochMillis => parse_number(value)
                .and_then(|millis| scale(millis, 1_000.0))
                .map(RecencyValue),
            Self::Version => parse_number(value)
                .filter(|version| version.fract() == 0.0)
                .and_then(|version| scale(version, 1.0))
                .map(RecencyValue),
        }
    }
}

/// Normalized recency value.
///
/// Timestamps are stored as microseconds since the Unix epoch, versions as the
/// raw counter, so a single integer ordering applies to every descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecencyValue(i64);

impl RecencyValue {
    /// Creates a recency value from its stored integer form.
    #[must_use]
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Creates a timestamp recency value.
    #[must_use]
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_micros())
    }

    /// Returns the stored integer form.
    #[must_use]
    pub fn raw(self) -> i64 {
        self.0
    }
}

/// Descriptor rule deciding which writes may overwrite a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecencyRule {
    /// Last arrival wins. Only valid for vendors with in-order delivery.
    AlwaysReplace,
    /// Compare a payload field using the given ordering.
    Field {
        /// Location of the recency field in the payload.
        path: FieldPath,
        /// Interpretation of the field.
        ordering: RecencyOrdering,
    },
}

impl RecencyRule {
    /// Convenience constructor for a field rule.
    pub fn field(path: &str, ordering: RecencyOrdering) -> AppResult<Self> {
        Ok(Self::Field {
            path: FieldPath::new(path)?,
            ordering,
        })
    }

    /// Extracts the candidate recency from a payload.
    ///
    /// Returns `None` for [`RecencyRule::AlwaysReplace`]. A declared field that
    /// is absent or unparseable is a malformed payload.
    pub fn extract(&self, payload: &Value) -> AppResult<Option<RecencyValue>> {
        match self {
            Self::AlwaysReplace => Ok(None),
            Self::Field { path, ordering } => {
                let raw = path.resolve(payload).ok_or_else(|| {
                    AppError::MalformedPayload(format!("recency field '{path}' is missing"))
                })?;
                ordering.parse(raw).map(Some).ok_or_else(|| {
                    AppError::MalformedPayload(format!(
                        "recency field '{path}' has unparseable value '{raw}'"
                    ))
                })
            }
        }
    }
}

fn parse_iso_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|number| number.is_finite())
}

fn scale(value: f64, factor: f64) -> Option<i64> {
    let scaled = (value * factor).round();
    if scaled < i64::MIN as f64 || scaled > i64::MAX as f64 {
        return None;
    }

    Some(scaled as i64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{RecencyOrdering, RecencyRule, RecencyValue};

    #[test]
    fn iso_timestamps_compare_as_instants() {
        let utc = RecencyOrdering::IsoTimestamp.parse(&json!("2024-03-01T10:00:00Z"));
        let offset = RecencyOrdering::IsoTimestamp.parse(&json!("2024-03-01T11:00:00+01:00"));
        let later = RecencyOrdering::IsoTimestamp.parse(&json!("2024-03-01T10:00:01Z"));

        assert_eq!(utc, offset);
        assert!(later > utc);
    }

    #[test]
    fn iso_timestamps_accept_naive_and_date_forms() {
        let naive = RecencyOrdering::IsoTimestamp.parse(&json!("2024-03-01 00:00:00"));
        let date = RecencyOrdering::IsoTimestamp.parse(&json!("2024-03-01"));
        assert!(naive.is_some());
        assert_eq!(naive, date);
    }

    #[test]
    fn epoch_seconds_and_millis_share_a_scale() {
        let seconds = RecencyOrdering::EpochSeconds.parse(&json!(1_700_000_000));
        let millis = RecencyOrdering::EpochMillis.parse(&json!("1700000000000"));
        assert_eq!(seconds, millis);
        assert_eq!(seconds, Some(RecencyValue::from_raw(1_700_000_000_000_000)));
    }

    #[test]
    fn versions_must_be_integral() {
        assert_eq!(
            RecencyOrdering::Version.parse(&json!(42)),
            Some(RecencyValue::from_raw(42))
        );
        assert!(RecencyOrdering::Version.parse(&json!(4.5)).is_none());
    }

    #[test]
    fn missing_or_invalid_recency_is_malformed() {
        let rule = RecencyRule::field("updated_at", RecencyOrdering::IsoTimestamp)
            .unwrap_or_else(|_| unreachable!());

        assert!(rule.extract(&json!({})).is_err());
        assert!(rule.extract(&json!({"updated_at": "yesterday"})).is_err());
        assert!(rule.extract(&json!({"updated_at": "2024-01-01"})).is_ok());
    }

    #[test]
    fn always_replace_has_no_recency() {
        let extracted = RecencyRule::AlwaysReplace.extract(&json!({"id": 1}));
        assert!(matches!(extracted, Ok(None)));
    }
}
