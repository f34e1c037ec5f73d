use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http::HeaderMap;
use mirrorline_core::{AppError, AppResult};
use mirrorline_domain::{
    BackfillMode, FieldPath, Integration, OpaqueId, ResourceDescriptor, VerificationFailure,
    WebhookMode, WebhookOperation, scalar_key,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    DependencyGraph, DescriptorRegistry, IntegrationRepository, RecordChange, RecordChangeKind,
    RecordChangePublisher, RecordRepository, SyncJobQueue, SyncJobRequest,
};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw inbound webhook request.
#[derive(Debug, Clone, Default)]
pub struct InboundWebhook {
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw request body, exactly as signed by the vendor.
    pub body: Vec<u8>,
}

/// Webhook acknowledgment returned to the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    /// Processed synchronously.
    Ok,
    /// Acknowledged; the work was queued.
    Accepted,
    /// Verification failed.
    Rejected(VerificationFailure),
}

impl WebhookAck {
    /// Returns the HTTP status code for this acknowledgment.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Accepted => 202,
            Self::Rejected(_) => 401,
        }
    }

    /// Returns the short response body.
    #[must_use]
    pub fn body(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Accepted => "accepted",
            Self::Rejected(failure) => failure.diagnostic(),
        }
    }
}

/// Verifies, unwraps and dispatches inbound vendor webhooks.
#[derive(Clone)]
pub struct WebhookService {
    registry: DescriptorRegistry,
    graph: DependencyGraph,
    integrations: Arc<dyn IntegrationRepository>,
    records: Arc<dyn RecordRepository>,
    jobs: Arc<dyn SyncJobQueue>,
    publisher: Arc<dyn RecordChangePublisher>,
}

impl WebhookService {
    /// Creates a webhook service.
    #[must_use]
    pub fn new(
        registry: DescriptorRegistry,
        integrations: Arc<dyn IntegrationRepository>,
        records: Arc<dyn RecordRepository>,
        jobs: Arc<dyn SyncJobQueue>,
        publisher: Arc<dyn RecordChangePublisher>,
    ) -> Self {
        Self {
            graph: DependencyGraph::new(registry.clone(), integrations.clone()),
            registry,
            integrations,
            records,
            jobs,
            publisher,
        }
    }

    /// Handles one webhook addressed to an integration's opaque id.
    ///
    /// Verification failures never reach storage and come back as
    /// [`WebhookAck::Rejected`]. Malformed bodies are logged and acknowledged
    /// so the vendor keeps the subscription alive.
    pub async fn handle(
        &self,
        opaque_id: &OpaqueId,
        request: InboundWebhook,
    ) -> AppResult<WebhookAck> {
        let integration = self
            .integrations
            .find_by_opaque_id(opaque_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("integration '{opaque_id}'")))?;
        let descriptor = self.registry.get(integration.resource_type())?;
        let webhook = descriptor.webhook().ok_or_else(|| {
            AppError::NotFound(format!(
                "{} integrations do not receive webhooks",
                integration.resource_type()
            ))
        })?;

        if let Err(failure) = webhook.verification.verify(
            &request.headers,
            &request.body,
            integration.credentials(),
            Utc::now(),
        ) {
            warn!(
                opaque_id = %opaque_id,
                resource_type = %integration.resource_type(),
                diagnostic = failure.diagnostic(),
                "webhook verification failed"
            );
            return Ok(WebhookAck::Rejected(failure));
        }

        self.graph.resolve(&integration).await?;

        let event: Value = match serde_json::from_slice(&request.body) {
            Ok(event) => event,
            Err(error) => {
                warn!(opaque_id = %opaque_id, error = %error, "webhook body is not JSON");
                return Ok(WebhookAck::Ok);
            }
        };

        let operation = match &webhook.mode {
            WebhookMode::Upsert => WebhookOperation::Upsert,
            WebhookMode::Signal(mode) => WebhookOperation::Backfill(*mode),
            WebhookMode::Operations(table) => table.select(&event).clone(),
        };

        match operation {
            WebhookOperation::Upsert => {
                let resource = match webhook.unwrap_envelope(&event) {
                    Ok(resource) => resource.clone(),
                    Err(error) => {
                        warn!(opaque_id = %opaque_id, error = %error, "webhook envelope skipped");
                        return Ok(WebhookAck::Ok);
                    }
                };
                self.upsert(&integration, &descriptor, resource).await
            }
            WebhookOperation::Backfill(mode) => self.enqueue_backfill(&integration, mode).await,
            WebhookOperation::RemoveRecords { ids_path } => {
                self.remove(&integration, &ids_path, &event).await
            }
            WebhookOperation::Ignore => {
                info!(opaque_id = %opaque_id, "webhook acknowledged without work");
                Ok(WebhookAck::Ok)
            }
        }
    }

    async fn upsert(
        &self,
        integration: &Integration,
        descriptor: &ResourceDescriptor,
        resource: Value,
    ) -> AppResult<WebhookAck> {
        let result = match self
            .records
            .apply_candidate(
                integration.tenant_id(),
                integration.id(),
                descriptor,
                resource.clone(),
                Utc::now(),
            )
            .await
        {
            Ok(result) => result,
            Err(AppError::MalformedPayload(message)) => {
                warn!(
                    integration_id = %integration.id(),
                    error = %message,
                    "malformed webhook payload skipped"
                );
                return Ok(WebhookAck::Ok);
            }
            Err(error) => return Err(error),
        };

        info!(
            integration_id = %integration.id(),
            external_id = %result.external_id,
            outcome = ?result.outcome,
            "webhook record applied"
        );

        if result.outcome.wrote() {
            self.notify(integration, result.external_id, RecordChangeKind::Upserted, resource);
        }

        Ok(WebhookAck::Ok)
    }

    async fn enqueue_backfill(
        &self,
        integration: &Integration,
        mode: BackfillMode,
    ) -> AppResult<WebhookAck> {
        let job_id = self
            .jobs
            .enqueue_backfill(SyncJobRequest {
                tenant_id: integration.tenant_id(),
                integration_id: integration.id(),
                mode,
                cascade: false,
            })
            .await?;
        info!(
            integration_id = %integration.id(),
            job_id = %job_id,
            mode = mode.as_str(),
            "webhook queued a backfill"
        );

        Ok(WebhookAck::Accepted)
    }

    async fn remove(
        &self,
        integration: &Integration,
        ids_path: &FieldPath,
        event: &Value,
    ) -> AppResult<WebhookAck> {
        let Some(Value::Array(ids)) = ids_path.resolve(event) else {
            warn!(
                integration_id = %integration.id(),
                path = %ids_path,
                "removal webhook carries no id list"
            );
            return Ok(WebhookAck::Ok);
        };
        let external_ids: Vec<String> = ids.iter().filter_map(scalar_key).collect();

        let removed = self
            .records
            .mark_removed(
                integration.tenant_id(),
                integration.id(),
                &external_ids,
                Utc::now(),
            )
            .await?;
        info!(
            integration_id = %integration.id(),
            requested = external_ids.len(),
            removed = removed.len(),
            "webhook removed records"
        );

        for external_id in removed {
            self.notify(integration, external_id, RecordChangeKind::Removed, Value::Null);
        }

        Ok(WebhookAck::Ok)
    }

    /// Publishes a change on a background task so a slow notification channel
    /// never delays the vendor's acknowledgment.
    fn notify(
        &self,
        integration: &Integration,
        external_id: String,
        kind: RecordChangeKind,
        payload: Value,
    ) {
        let change = RecordChange {
            tenant_id: integration.tenant_id(),
            integration_id: integration.id(),
            resource_type: integration.resource_type().as_str().to_owned(),
            external_id,
            kind,
            payload,
        };
        let integration_id = integration.id();
        let publisher = self.publisher.clone();

        tokio::spawn(async move {
            match tokio::time::timeout(PUBLISH_TIMEOUT, publisher.publish(change)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(
                    integration_id = %integration_id,
                    error = %error,
                    "record change notification failed"
                ),
                Err(_) => warn!(
                    integration_id = %integration_id,
                    timeout_ms = PUBLISH_TIMEOUT.as_millis(),
                    "record change notification timed out"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests;
