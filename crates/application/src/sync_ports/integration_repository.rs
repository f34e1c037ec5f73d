use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirrorline_core::{AppResult, TenantId};
use mirrorline_domain::{Integration, IntegrationId, OpaqueId, RecencyValue};

/// Repository port for configured integrations.
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    /// Inserts or replaces one integration.
    async fn save_integration(&self, integration: &Integration) -> AppResult<()>;

    /// Returns one integration by id.
    async fn find_integration(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Option<Integration>>;

    /// Returns the integration addressed by a public opaque id.
    async fn find_by_opaque_id(&self, opaque_id: &OpaqueId) -> AppResult<Option<Integration>>;

    /// Lists integrations whose parent link points at the given integration.
    async fn list_dependents(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Vec<Integration>>;

    /// Deletes one integration.
    async fn delete_integration(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<()>;

    /// Advances the backfill low-water-mark after a fully successful run.
    ///
    /// The stored watermark never moves backwards.
    async fn record_backfill_success(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        watermark: Option<RecencyValue>,
        finished_at: DateTime<Utc>,
    ) -> AppResult<()>;
}
