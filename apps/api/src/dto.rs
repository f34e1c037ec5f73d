use mirrorline_domain::{BackfillMode, Integration, webhook_url};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ready: bool,
    pub postgres: HealthDependencyStatus,
    pub redis: HealthDependencyStatus,
}

/// Status of one probed dependency.
#[derive(Debug, Serialize)]
pub struct HealthDependencyStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Transition payload posted to a setup `post_to_url`.
#[derive(Debug, Deserialize)]
pub struct SetupTransitionRequest {
    pub value: String,
}

/// Manual backfill trigger.
#[derive(Debug, Deserialize)]
pub struct TriggerBackfillRequest {
    #[serde(default = "default_mode")]
    pub mode: BackfillMode,
    #[serde(default)]
    pub cascade: bool,
}

fn default_mode() -> BackfillMode {
    BackfillMode::Full
}

/// Queued job reference.
#[derive(Debug, Serialize)]
pub struct QueuedJobResponse {
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateIntegrationRequest {
    pub resource_type: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkDependencyRequest {
    pub depends_on: Option<Uuid>,
}

/// Integration view returned by the internal lifecycle routes.
///
/// Credentials are reported by key only.
#[derive(Debug, Serialize)]
pub struct IntegrationResponse {
    pub id: String,
    pub tenant_id: String,
    pub opaque_id: String,
    pub resource_type: String,
    pub depends_on: Option<String>,
    pub credential_keys: Vec<String>,
    pub last_backfilled_cursor: Option<i64>,
    pub last_backfilled_at: Option<String>,
    pub webhook_url: String,
}

impl IntegrationResponse {
    pub fn from_integration(integration: &Integration, public_base_url: &str) -> Self {
        Self {
            id: integration.id().to_string(),
            tenant_id: integration.tenant_id().to_string(),
            opaque_id: integration.opaque_id().to_string(),
            resource_type: integration.resource_type().to_string(),
            depends_on: integration.depends_on().map(|parent| parent.to_string()),
            credential_keys: integration
                .credentials()
                .keys()
                .map(str::to_owned)
                .collect(),
            last_backfilled_cursor: integration
                .last_backfilled_cursor()
                .map(|cursor| cursor.raw()),
            last_backfilled_at: integration
                .last_backfilled_at()
                .map(|timestamp| timestamp.to_rfc3339()),
            webhook_url: webhook_url(public_base_url, integration),
        }
    }
}
