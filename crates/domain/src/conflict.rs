//! Conflict resolution between stored and candidate records.

use chrono::{DateTime, Utc};
use mirrorline_core::AppResult;
use serde_json::Value;

use crate::{RecencyRule, RecencyValue, RecordDraft, ResourceDescriptor, SyncedRecord};

/// Write decision for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No stored record exists.
    Insert,
    /// The candidate is at least as recent as the stored record.
    Replace,
    /// The stored record is strictly newer and stays untouched.
    Skip,
}

/// Decides whether a candidate may overwrite the stored record.
///
/// Ties replace, so re-delivery of the same event is accepted.
#[must_use]
pub fn resolve(
    existing: Option<&SyncedRecord>,
    candidate_recency: Option<RecencyValue>,
    rule: &RecencyRule,
) -> Resolution {
    let Some(existing) = existing else {
        return Resolution::Insert;
    };

    match rule {
        RecencyRule::AlwaysReplace => Resolution::Replace,
        RecencyRule::Field { .. } => match (existing.recency, candidate_recency) {
            (Some(stored), Some(candidate)) if candidate < stored => Resolution::Skip,
            (Some(_), None) => Resolution::Skip,
            _ => Resolution::Replace,
        },
    }
}

/// Resolution plus the prepared record for one candidate write.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    /// Write decision.
    pub resolution: Resolution,
    /// Prepared record, including its full enrichment set.
    pub draft: RecordDraft,
}

/// Prepares a candidate payload for storage.
///
/// The descriptor transform runs first, against the stored payload, and the
/// resolution is decided on the transformed candidate.
pub fn plan_write(
    descriptor: &ResourceDescriptor,
    existing: Option<&SyncedRecord>,
    candidate: Value,
    observed_at: DateTime<Utc>,
) -> AppResult<WritePlan> {
    let external_id = descriptor.external_id(&candidate)?;
    let payload = match descriptor.transform() {
        Some(transform) => transform.apply(
            existing.map(|record| &record.payload),
            candidate,
            observed_at,
        ),
        None => candidate,
    };

    let recency = descriptor.recency().extract(&payload)?;
    let mut enrichments = Vec::new();
    for enrichment in descriptor.enrichments() {
        enrichments.extend(enrichment.extract(&payload)?);
    }

    let draft = RecordDraft {
        external_id,
        recency,
        projections: descriptor.projections(&payload),
        removed: descriptor.is_removed(&payload),
        enrichments,
        payload,
    };

    Ok(WritePlan {
        resolution: resolve(existing, draft.recency, descriptor.recency()),
        draft,
    })
}
