use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirrorline_core::{AppResult, TenantId};
use mirrorline_domain::{
    EnrichmentRecord, IntegrationId, RecencyValue, ResourceDescriptor, SyncedRecord,
    UpsertOutcome,
};
use serde_json::Value;

/// Result of applying one candidate payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertResult {
    /// External id extracted from the payload.
    pub external_id: String,
    /// Storage outcome.
    pub outcome: UpsertOutcome,
}

/// Repository port for mirrored records and their enrichments.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Applies one candidate payload atomically.
    ///
    /// Implementations read the stored record, run
    /// [`mirrorline_domain::plan_write`] and write the record and its full
    /// enrichment set in one atomic operation, so concurrent writers for the
    /// same external id both honor the recency comparison.
    async fn apply_candidate(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        descriptor: &ResourceDescriptor,
        candidate: Value,
        observed_at: DateTime<Utc>,
    ) -> AppResult<UpsertResult>;

    /// Soft-deletes records by external id and returns the ids that were
    /// live before the call.
    async fn mark_removed(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        external_ids: &[String],
        removed_at: DateTime<Utc>,
    ) -> AppResult<Vec<String>>;

    /// Returns one stored record.
    async fn find_record(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        external_id: &str,
    ) -> AppResult<Option<SyncedRecord>>;

    /// Lists stored records of an integration ordered by external id.
    async fn list_records(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Vec<SyncedRecord>>;

    /// Lists enrichment rows of one parent record ordered by child key.
    async fn list_enrichments(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        parent_external_id: &str,
    ) -> AppResult<Vec<EnrichmentRecord>>;

    /// Returns the highest stored recency of an integration.
    async fn max_recency(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Option<RecencyValue>>;
}
