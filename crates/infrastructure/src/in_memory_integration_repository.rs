use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirrorline_application::IntegrationRepository;
use mirrorline_core::{AppError, AppResult, TenantId};
use mirrorline_domain::{Integration, IntegrationId, OpaqueId, RecencyValue};
use tokio::sync::RwLock;

/// In-memory integration repository implementation.
#[derive(Debug, Default)]
pub struct InMemoryIntegrationRepository {
    integrations: RwLock<HashMap<(TenantId, IntegrationId), Integration>>,
}

impl InMemoryIntegrationRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntegrationRepository for InMemoryIntegrationRepository {
    async fn save_integration(&self, integration: &Integration) -> AppResult<()> {
        let mut integrations = self.integrations.write().await;
        let opaque_taken = integrations.values().any(|stored| {
            stored.opaque_id() == integration.opaque_id() && stored.id() != integration.id()
        });
        if opaque_taken {
            return Err(AppError::Conflict(format!(
                "opaque id '{}' is already assigned",
                integration.opaque_id()
            )));
        }

        integrations.insert(
            (integration.tenant_id(), integration.id()),
            integration.clone(),
        );
        Ok(())
    }

    async fn find_integration(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Option<Integration>> {
        Ok(self
            .integrations
            .read()
            .await
            .get(&(tenant_id, integration_id))
            .cloned())
    }

    async fn find_by_opaque_id(&self, opaque_id: &OpaqueId) -> AppResult<Option<Integration>> {
        Ok(self
            .integrations
            .read()
            .await
            .values()
            .find(|integration| integration.opaque_id() == opaque_id)
            .cloned())
    }

    async fn list_dependents(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Vec<Integration>> {
        let integrations = self.integrations.read().await;
        let mut dependents: Vec<Integration> = integrations
            .iter()
            .filter(|((stored_tenant_id, _), integration)| {
                *stored_tenant_id == tenant_id && integration.depends_on() == Some(integration_id)
            })
            .map(|(_, integration)| integration.clone())
            .collect();
        dependents.sort_by_key(Integration::id);
        Ok(dependents)
    }

    async fn delete_integration(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<()> {
        self.integrations
            .write()
            .await
            .remove(&(tenant_id, integration_id))
            .map(|_| ())
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "integration '{integration_id}' for tenant '{tenant_id}'"
                ))
            })
    }

    async fn record_backfill_success(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        watermark: Option<RecencyValue>,
        finished_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut integrations = self.integrations.write().await;
        let integration = integrations
            .get_mut(&(tenant_id, integration_id))
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "integration '{integration_id}' for tenant '{tenant_id}'"
                ))
            })?;
        integration.record_backfill_success(watermark, finished_at);
        Ok(())
    }
}
