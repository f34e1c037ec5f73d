use std::sync::Arc;

use mirrorline_core::{AppError, AppResult, NonEmptyString};
use mirrorline_domain::{
    AncestorStatus, Integration, OpaqueId, SetupStep, SetupTrack, SetupTrackSpec, step,
};
use tracing::info;

use crate::{DependencyGraph, DescriptorRegistry, IntegrationRepository, VendorClient};

mod registration;

/// Operator setup flow: computes steps and applies field transitions.
#[derive(Clone)]
pub struct SetupService {
    registry: DescriptorRegistry,
    graph: DependencyGraph,
    integrations: Arc<dyn IntegrationRepository>,
    vendor: Arc<dyn VendorClient>,
    public_base_url: String,
}

impl SetupService {
    /// Creates a setup service.
    #[must_use]
    pub fn new(
        registry: DescriptorRegistry,
        integrations: Arc<dyn IntegrationRepository>,
        vendor: Arc<dyn VendorClient>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            graph: DependencyGraph::new(registry.clone(), integrations.clone()),
            registry,
            integrations,
            vendor,
            public_base_url: public_base_url.into(),
        }
    }

    /// Returns the current step of one track. Never mutates state.
    pub async fn step(&self, opaque_id: &OpaqueId, track: SetupTrack) -> AppResult<SetupStep> {
        let integration = self.load(opaque_id).await?;
        self.step_for(&integration, track).await
    }

    /// Stores one field value and returns the new step of its track.
    ///
    /// When the value completes a track that declares a vendor registration,
    /// the registration runs first and nothing is stored if it fails.
    pub async fn transition(
        &self,
        opaque_id: &OpaqueId,
        field_key: &str,
        value: &str,
    ) -> AppResult<SetupStep> {
        let mut integration = self.load(opaque_id).await?;
        let descriptor = self.registry.get(integration.resource_type())?;
        let setup = descriptor.setup();
        let (track, spec) = locate_field(setup.create.as_ref(), &setup.backfill, field_key)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "{} setup has no field '{field_key}'",
                    integration.resource_type()
                ))
            })?;

        match self.graph.ancestor_status(&integration).await? {
            AncestorStatus::Missing(required) | AncestorStatus::Unconfigured(required) => {
                return Err(AppError::DependencyMissing(format!(
                    "configure the linked {required} integration first"
                )));
            }
            AncestorStatus::NotRequired | AncestorStatus::Ready => {}
        }

        let value = NonEmptyString::new(value.trim())?;
        let field = spec
            .field(field_key)
            .ok_or_else(|| AppError::Internal(format!("setup field '{field_key}' vanished")))?;
        integration.set_credential(field.key.as_str(), value.as_str());
        if let Some(derived) = &field.derives {
            integration.set_credential(derived.key.as_str(), derived.render(value.as_str()));
        }

        if spec.next_missing(&integration).is_none()
            && let Some(registration) = &spec.registration
        {
            self.register(&mut integration, &descriptor, registration)
                .await?;
        }

        self.integrations.save_integration(&integration).await?;
        info!(
            integration_id = %integration.id(),
            track = track.as_str(),
            field = field_key,
            "setup field stored"
        );

        self.step_for(&integration, track).await
    }

    async fn step_for(&self, integration: &Integration, track: SetupTrack) -> AppResult<SetupStep> {
        let descriptor = self.registry.get(integration.resource_type())?;
        let ancestor = self.graph.ancestor_status(integration).await?;
        Ok(step(
            track,
            integration,
            &descriptor,
            &ancestor,
            &self.public_base_url,
        ))
    }

    async fn load(&self, opaque_id: &OpaqueId) -> AppResult<Integration> {
        self.integrations
            .find_by_opaque_id(opaque_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("integration '{opaque_id}'")))
    }
}

fn locate_field<'a>(
    create: Option<&'a SetupTrackSpec>,
    backfill: &'a SetupTrackSpec,
    field_key: &str,
) -> Option<(SetupTrack, &'a SetupTrackSpec)> {
    create
        .filter(|spec| spec.field(field_key).is_some())
        .map(|spec| (SetupTrack::Create, spec))
        .or_else(|| {
            backfill
                .field(field_key)
                .map(|_| (SetupTrack::Backfill, backfill))
        })
}
