use std::sync::Arc;

use mirrorline_core::{AppError, AppResult, TenantId};
use mirrorline_domain::{Integration, IntegrationId, OpaqueId, ResourceType};
use tracing::info;

use crate::{DependencyGraph, DescriptorRegistry, IntegrationRepository};

/// Integration lifecycle: creation, linking, credential reset and deletion.
#[derive(Clone)]
pub struct IntegrationService {
    registry: DescriptorRegistry,
    graph: DependencyGraph,
    integrations: Arc<dyn IntegrationRepository>,
}

impl IntegrationService {
    /// Creates an integration service.
    #[must_use]
    pub fn new(registry: DescriptorRegistry, integrations: Arc<dyn IntegrationRepository>) -> Self {
        Self {
            graph: DependencyGraph::new(registry.clone(), integrations.clone()),
            registry,
            integrations,
        }
    }

    /// Creates an unconfigured integration with a fresh opaque id.
    pub async fn create(
        &self,
        tenant_id: TenantId,
        resource_type: ResourceType,
    ) -> AppResult<Integration> {
        self.registry.get(&resource_type)?;
        let integration = Integration::new(tenant_id, resource_type);
        self.integrations.save_integration(&integration).await?;
        info!(
            integration_id = %integration.id(),
            resource_type = %integration.resource_type(),
            "integration created"
        );
        Ok(integration)
    }

    /// Returns one integration.
    pub async fn find(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Integration> {
        self.integrations
            .find_integration(tenant_id, integration_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "integration '{integration_id}' for tenant '{tenant_id}'"
                ))
            })
    }

    /// Returns the integration addressed by an opaque id.
    pub async fn find_by_opaque_id(&self, opaque_id: &OpaqueId) -> AppResult<Integration> {
        self.integrations
            .find_by_opaque_id(opaque_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("integration '{opaque_id}'")))
    }

    /// Links a child under a parent, or unlinks it with `None`.
    pub async fn link_dependency(
        &self,
        tenant_id: TenantId,
        child_id: IntegrationId,
        parent_id: Option<IntegrationId>,
    ) -> AppResult<Integration> {
        let mut child = self.find(tenant_id, child_id).await?;
        if let Some(parent_id) = parent_id {
            let parent = self.find(tenant_id, parent_id).await?;
            self.graph.validate_link(&child, &parent).await?;
        }

        child.set_dependency(parent_id)?;
        self.integrations.save_integration(&child).await?;
        info!(
            integration_id = %child.id(),
            parent_id = ?parent_id.map(|parent_id| parent_id.to_string()),
            "integration dependency updated"
        );
        Ok(child)
    }

    /// Clears every credential and the backfill low-water-mark.
    pub async fn reset_credentials(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Integration> {
        let mut integration = self.find(tenant_id, integration_id).await?;
        integration.reset_credentials();
        self.integrations.save_integration(&integration).await?;
        info!(integration_id = %integration.id(), "integration credentials reset");
        Ok(integration)
    }

    /// Deletes an integration that no other integration depends on.
    pub async fn delete(&self, tenant_id: TenantId, integration_id: IntegrationId) -> AppResult<()> {
        let integration = self.find(tenant_id, integration_id).await?;
        let dependents = self
            .integrations
            .list_dependents(tenant_id, integration.id())
            .await?;
        if !dependents.is_empty() {
            return Err(AppError::Conflict(format!(
                "integration '{integration_id}' still has {} dependent integrations",
                dependents.len()
            )));
        }

        self.integrations
            .delete_integration(tenant_id, integration_id)
            .await?;
        info!(integration_id = %integration_id, "integration deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mirrorline_core::{AppError, TenantId};
    use mirrorline_domain::{ResourceType, catalog};

    use super::IntegrationService;
    use crate::DescriptorRegistry;
    use crate::test_support::FakeIntegrationRepository;

    fn resource(raw: &str) -> ResourceType {
        ResourceType::new(raw).unwrap_or_else(|_| unreachable!())
    }

    fn service(repository: Arc<FakeIntegrationRepository>) -> IntegrationService {
        IntegrationService::new(
            DescriptorRegistry::reference().unwrap_or_else(|_| unreachable!()),
            repository,
        )
    }

    #[tokio::test]
    async fn create_rejects_unknown_resource_types() {
        let service = service(Arc::new(FakeIntegrationRepository::default()));
        let result = service
            .create(TenantId::new(), resource("fax_machine_v1"))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn created_integrations_get_distinct_opaque_ids() {
        let service = service(Arc::new(FakeIntegrationRepository::default()));
        let tenant_id = TenantId::new();
        let first = service
            .create(tenant_id, resource(catalog::BILLING_SUBSCRIPTION))
            .await
            .unwrap_or_else(|_| unreachable!());
        let second = service
            .create(tenant_id, resource(catalog::BILLING_SUBSCRIPTION))
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_ne!(first.opaque_id(), second.opaque_id());

        let found = service
            .find_by_opaque_id(first.opaque_id())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(found.id(), first.id());
    }

    #[tokio::test]
    async fn delete_is_refused_while_dependents_exist() {
        let repository = Arc::new(FakeIntegrationRepository::default());
        let service = service(repository.clone());
        let tenant_id = TenantId::new();
        let item = service
            .create(tenant_id, resource(catalog::BANK_ITEM))
            .await
            .unwrap_or_else(|_| unreachable!());
        let transactions = service
            .create(tenant_id, resource(catalog::BANK_TRANSACTION))
            .await
            .unwrap_or_else(|_| unreachable!());
        service
            .link_dependency(tenant_id, transactions.id(), Some(item.id()))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(matches!(
            service.delete(tenant_id, item.id()).await,
            Err(AppError::Conflict(_))
        ));

        service
            .delete(tenant_id, transactions.id())
            .await
            .unwrap_or_else(|_| unreachable!());
        service
            .delete(tenant_id, item.id())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(repository.get(item.id()).await.is_none());
    }

    #[tokio::test]
    async fn link_rejects_wrong_parent_type() {
        let service = service(Arc::new(FakeIntegrationRepository::default()));
        let tenant_id = TenantId::new();
        let auth = service
            .create(tenant_id, resource(catalog::CASEBOOK_AUTH))
            .await
            .unwrap_or_else(|_| unreachable!());
        let transactions = service
            .create(tenant_id, resource(catalog::BANK_TRANSACTION))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(matches!(
            service
                .link_dependency(tenant_id, transactions.id(), Some(auth.id()))
                .await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn reset_clears_credentials_and_watermark() {
        let repository = Arc::new(FakeIntegrationRepository::default());
        let service = service(repository.clone());
        let tenant_id = TenantId::new();
        let mut integration = service
            .create(tenant_id, resource(catalog::BILLING_SUBSCRIPTION))
            .await
            .unwrap_or_else(|_| unreachable!());
        integration.set_credential("backfill_secret", "sk");
        repository.insert(integration.clone()).await;

        let reset = service
            .reset_credentials(tenant_id, integration.id())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(reset.credentials().is_empty());
        assert!(reset.last_backfilled_cursor().is_none());
    }
}
