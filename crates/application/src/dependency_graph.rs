use std::sync::Arc;

use mirrorline_core::{AppError, AppResult};
use mirrorline_domain::{AncestorStatus, DependencyWalk, Integration, ResourceType};
use tracing::debug;

use crate::{DescriptorRegistry, IntegrationRepository};

/// Longest parent chain followed when looking for an ancestor.
pub const MAX_ANCESTOR_DEPTH: usize = 8;

/// Resolves required ancestors and cascade targets between integrations.
#[derive(Clone)]
pub struct DependencyGraph {
    registry: DescriptorRegistry,
    integrations: Arc<dyn IntegrationRepository>,
}

impl DependencyGraph {
    /// Creates a dependency graph.
    #[must_use]
    pub fn new(registry: DescriptorRegistry, integrations: Arc<dyn IntegrationRepository>) -> Self {
        Self {
            registry,
            integrations,
        }
    }

    /// Returns the ancestor type a resource type requires, if any.
    pub fn required_ancestor(&self, resource_type: &ResourceType) -> AppResult<Option<ResourceType>> {
        Ok(self
            .registry
            .get(resource_type)?
            .dependency()
            .map(|dependency| dependency.resource_type.clone()))
    }

    /// Reports whether the required ancestor is linked and configured.
    pub async fn ancestor_status(&self, integration: &Integration) -> AppResult<AncestorStatus> {
        let descriptor = self.registry.get(integration.resource_type())?;
        let Some(dependency) = descriptor.dependency() else {
            return Ok(AncestorStatus::NotRequired);
        };

        let ancestor = match dependency.walk {
            DependencyWalk::DirectParent => self
                .parent_of(integration)
                .await?
                .filter(|parent| parent.resource_type() == &dependency.resource_type),
            DependencyWalk::NearestOfType => {
                self.find_ancestor_of_type(integration, &dependency.resource_type)
                    .await?
            }
        };

        let Some(ancestor) = ancestor else {
            return Ok(AncestorStatus::Missing(dependency.resource_type.clone()));
        };

        let ancestor_descriptor = self.registry.get(ancestor.resource_type())?;
        if ancestor_descriptor.is_configured(ancestor.credentials()) {
            Ok(AncestorStatus::Ready)
        } else {
            Ok(AncestorStatus::Unconfigured(dependency.resource_type.clone()))
        }
    }

    /// Returns the configured required ancestor, or `None` when the
    /// descriptor declares no dependency.
    ///
    /// A missing or unconfigured ancestor is [`AppError::DependencyMissing`].
    pub async fn resolve(&self, integration: &Integration) -> AppResult<Option<Integration>> {
        let descriptor = self.registry.get(integration.resource_type())?;
        let Some(dependency) = descriptor.dependency() else {
            return Ok(None);
        };

        match self.ancestor_status(integration).await? {
            AncestorStatus::NotRequired => Ok(None),
            AncestorStatus::Missing(required) => Err(AppError::DependencyMissing(format!(
                "integration '{}' requires a linked {required} integration",
                integration.id()
            ))),
            AncestorStatus::Unconfigured(required) => Err(AppError::DependencyMissing(format!(
                "integration '{}' requires its {required} integration to be configured",
                integration.id()
            ))),
            AncestorStatus::Ready => {
                let ancestor = match dependency.walk {
                    DependencyWalk::DirectParent => self.parent_of(integration).await?,
                    DependencyWalk::NearestOfType => {
                        self.find_ancestor_of_type(integration, &dependency.resource_type)
                            .await?
                    }
                };
                ancestor.map(Some).ok_or_else(|| {
                    AppError::DependencyMissing(format!(
                        "integration '{}' lost its {} ancestor",
                        integration.id(),
                        dependency.resource_type
                    ))
                })
            }
        }
    }

    /// Walks the parent chain to the nearest integration of a type.
    pub async fn find_ancestor_of_type(
        &self,
        integration: &Integration,
        resource_type: &ResourceType,
    ) -> AppResult<Option<Integration>> {
        let mut current = integration.clone();
        for _ in 0..MAX_ANCESTOR_DEPTH {
            let Some(parent) = self.parent_of(&current).await? else {
                return Ok(None);
            };
            if parent.resource_type() == resource_type {
                return Ok(Some(parent));
            }
            current = parent;
        }

        Ok(None)
    }

    /// Returns the integrations to enqueue after a successful backfill, in
    /// resource type order.
    ///
    /// Dependents that cannot be backfilled or lack required credentials are
    /// left out.
    pub async fn cascade_targets(&self, integration: &Integration) -> AppResult<Vec<Integration>> {
        let mut dependents = self
            .integrations
            .list_dependents(integration.tenant_id(), integration.id())
            .await?;
        dependents.retain(|dependent| {
            let ready = self
                .registry
                .get(dependent.resource_type())
                .is_ok_and(|descriptor| {
                    descriptor.backfill().is_some()
                        && descriptor.is_configured(dependent.credentials())
                });
            if !ready {
                debug!(
                    integration_id = %integration.id(),
                    dependent_id = %dependent.id(),
                    "dependent skipped for cascade"
                );
            }
            ready
        });
        dependents.sort_by(|left, right| {
            left.resource_type()
                .cmp(right.resource_type())
                .then(left.id().cmp(&right.id()))
        });
        Ok(dependents)
    }

    /// Checks that `parent` may be linked as the parent of `child`.
    pub async fn validate_link(&self, child: &Integration, parent: &Integration) -> AppResult<()> {
        if child.tenant_id() != parent.tenant_id() {
            return Err(AppError::Validation(
                "integrations of different tenants cannot be linked".to_owned(),
            ));
        }

        let descriptor = self.registry.get(child.resource_type())?;
        let Some(dependency) = descriptor.dependency() else {
            return Err(AppError::Validation(format!(
                "{} integrations do not take a parent",
                child.resource_type()
            )));
        };

        let mut chain = vec![parent.clone()];
        let mut current = parent.clone();
        for _ in 0..MAX_ANCESTOR_DEPTH {
            let Some(next) = self.parent_of(&current).await? else {
                break;
            };
            chain.push(next.clone());
            current = next;
        }

        if chain.iter().any(|ancestor| ancestor.id() == child.id()) {
            return Err(AppError::Validation(format!(
                "linking '{}' under '{}' would create a cycle",
                child.id(),
                parent.id()
            )));
        }

        let satisfied = match dependency.walk {
            DependencyWalk::DirectParent => parent.resource_type() == &dependency.resource_type,
            DependencyWalk::NearestOfType => chain
                .iter()
                .any(|ancestor| ancestor.resource_type() == &dependency.resource_type),
        };

        if satisfied {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "{} integrations must be linked to a {} integration",
                child.resource_type(),
                dependency.resource_type
            )))
        }
    }

    async fn parent_of(&self, integration: &Integration) -> AppResult<Option<Integration>> {
        match integration.depends_on() {
            Some(parent_id) => {
                self.integrations
                    .find_integration(integration.tenant_id(), parent_id)
                    .await
            }
            None => Ok(None),
        }
    }
}
