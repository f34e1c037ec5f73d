use async_trait::async_trait;
use mirrorline_core::{AppResult, TenantId};
use mirrorline_domain::IntegrationId;
use serde::Serialize;
use serde_json::Value;

/// Kind of committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordChangeKind {
    /// The record was inserted or replaced.
    Upserted,
    /// The record was soft-deleted.
    Removed,
}

/// Post-ingest notification for downstream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordChange {
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Integration owning the record.
    pub integration_id: IntegrationId,
    /// Descriptor resource type.
    pub resource_type: String,
    /// Vendor primary key.
    pub external_id: String,
    /// Change kind.
    pub kind: RecordChangeKind,
    /// Payload as received, `null` for removals.
    pub payload: Value,
}

/// Notification channel port. Delivery and durability belong to the adapter.
#[async_trait]
pub trait RecordChangePublisher: Send + Sync {
    /// Enqueues one change notification.
    async fn publish(&self, change: RecordChange) -> AppResult<()>;
}
