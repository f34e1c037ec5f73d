use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{IntegrationId, RecencyValue};

/// One vendor resource instance mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedRecord {
    /// Owning integration.
    pub integration_id: IntegrationId,
    /// Vendor primary key.
    pub external_id: String,
    /// Normalized recency of the stored payload.
    pub recency: Option<RecencyValue>,
    /// Vendor payload as stored after transforms.
    pub payload: Value,
    /// Descriptor-defined scalar projections.
    pub projections: Map<String, Value>,
    /// Soft-delete marker.
    pub removed_at: Option<DateTime<Utc>>,
    /// Time of the last accepted write.
    pub updated_at: DateTime<Utc>,
}

/// Child row materialized from a nested array in a parent payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    /// Owning integration.
    pub integration_id: IntegrationId,
    /// External id of the parent record.
    pub parent_external_id: String,
    /// Enrichment name declared by the descriptor.
    pub enrichment: String,
    /// Natural key within the array.
    pub child_key: String,
    /// Array element payload.
    pub payload: Value,
}

/// Enrichment row prepared from a candidate payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentDraft {
    /// Enrichment name declared by the descriptor.
    pub enrichment: String,
    /// Natural key within the array.
    pub child_key: String,
    /// Array element payload.
    pub payload: Value,
}

/// Record fields prepared from a candidate payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    /// Vendor primary key.
    pub external_id: String,
    /// Normalized recency, absent for always-replace descriptors.
    pub recency: Option<RecencyValue>,
    /// Payload after transforms.
    pub payload: Value,
    /// Descriptor-defined scalar projections.
    pub projections: Map<String, Value>,
    /// Whether the payload carries the descriptor's removal marker.
    pub removed: bool,
    /// Full enrichment set for this parent.
    pub enrichments: Vec<EnrichmentDraft>,
}

/// Result of applying one candidate write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// A new record was stored.
    Inserted,
    /// The stored record was replaced.
    Replaced,
    /// The stored record was newer and left untouched.
    Skipped,
}

impl UpsertOutcome {
    /// Returns whether storage changed.
    #[must_use]
    pub fn wrote(self) -> bool {
        !matches!(self, Self::Skipped)
    }
}
