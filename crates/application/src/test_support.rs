//! Port fakes shared by service tests.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderValue};
use mirrorline_core::{AppError, AppResult, TenantId};
use mirrorline_domain::{
    EnrichmentRecord, Integration, IntegrationId, OpaqueId, RecencyValue, Resolution,
    ResourceDescriptor, SyncedRecord, UpsertOutcome, VendorPage, plan_write,
};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    ClaimedSyncJob, IntegrationRepository, RecordChange, RecordChangePublisher, RecordRepository,
    SyncJobQueue, SyncJobRequest, UpsertResult, VendorClient, VendorRequest,
};

#[derive(Default)]
pub struct FakeIntegrationRepository {
    pub integrations: Mutex<HashMap<IntegrationId, Integration>>,
}

impl FakeIntegrationRepository {
    pub async fn insert(&self, integration: Integration) {
        self.integrations
            .lock()
            .await
            .insert(integration.id(), integration);
    }

    pub async fn get(&self, integration_id: IntegrationId) -> Option<Integration> {
        self.integrations.lock().await.get(&integration_id).cloned()
    }
}

#[async_trait]
impl IntegrationRepository for FakeIntegrationRepository {
    async fn save_integration(&self, integration: &Integration) -> AppResult<()> {
        self.insert(integration.clone()).await;
        Ok(())
    }

    async fn find_integration(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Option<Integration>> {
        Ok(self
            .get(integration_id)
            .await
            .filter(|integration| integration.tenant_id() == tenant_id))
    }

    async fn find_by_opaque_id(&self, opaque_id: &OpaqueId) -> AppResult<Option<Integration>> {
        Ok(self
            .integrations
            .lock()
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
        Ok(self
            .integrations
            .lock()
            .await
            .values()
            .filter(|integration| {
                integration.tenant_id() == tenant_id
                    && integration.depends_on() == Some(integration_id)
            })
            .cloned()
            .collect())
    }

    async fn delete_integration(
        &self,
        _tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<()> {
        self.integrations.lock().await.remove(&integration_id);
        Ok(())
    }

    async fn record_backfill_success(
        &self,
        _tenant_id: TenantId,
        integration_id: IntegrationId,
        watermark: Option<RecencyValue>,
        finished_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut integrations = self.integrations.lock().await;
        let integration = integrations
            .get_mut(&integration_id)
            .ok_or_else(|| AppError::NotFound(format!("integration '{integration_id}'")))?;
        integration.record_backfill_success(watermark, finished_at);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRecordRepository {
    pub records: Mutex<BTreeMap<(IntegrationId, String), SyncedRecord>>,
    pub enrichments: Mutex<BTreeMap<(IntegrationId, String), Vec<EnrichmentRecord>>>,
}

impl FakeRecordRepository {
    pub async fn count(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl RecordRepository for FakeRecordRepository {
    async fn apply_candidate(
        &self,
        _tenant_id: TenantId,
        integration_id: IntegrationId,
        descriptor: &ResourceDescriptor,
        candidate: Value,
        observed_at: DateTime<Utc>,
    ) -> AppResult<UpsertResult> {
        let mut records = self.records.lock().await;
        let external_id = descriptor.external_id(&candidate)?;
        let key = (integration_id, external_id.clone());
        let plan = plan_write(descriptor, records.get(&key), candidate, observed_at)?;

        let outcome = match plan.resolution {
            Resolution::Skip => UpsertOutcome::Skipped,
            Resolution::Insert => UpsertOutcome::Inserted,
            Resolution::Replace => UpsertOutcome::Replaced,
        };

        if outcome.wrote() {
            let removed_at = records
                .get(&key)
                .and_then(|record| record.removed_at)
                .or_else(|| plan.draft.removed.then_some(observed_at));
            let children = plan
                .draft
                .enrichments
                .iter()
                .map(|draft| EnrichmentRecord {
                    integration_id,
                    parent_external_id: external_id.clone(),
                    enrichment: draft.enrichment.clone(),
                    child_key: draft.child_key.clone(),
                    payload: draft.payload.clone(),
                })
                .collect();
            self.enrichments.lock().await.insert(key.clone(), children);
            records.insert(
                key,
                SyncedRecord {
                    integration_id,
                    external_id: external_id.clone(),
                    recency: plan.draft.recency,
                    payload: plan.draft.payload,
                    projections: plan.draft.projections,
                    removed_at,
                    updated_at: observed_at,
                },
            );
        }

        Ok(UpsertResult {
            external_id,
            outcome,
        })
    }

    async fn mark_removed(
        &self,
        _tenant_id: TenantId,
        integration_id: IntegrationId,
        external_ids: &[String],
        removed_at: DateTime<Utc>,
    ) -> AppResult<Vec<String>> {
        let mut records = self.records.lock().await;
        let mut changed = Vec::new();
        for external_id in external_ids {
            if let Some(record) = records.get_mut(&(integration_id, external_id.clone()))
                && record.removed_at.is_none()
            {
                record.removed_at = Some(removed_at);
                changed.push(external_id.clone());
            }
        }
        Ok(changed)
    }

    async fn find_record(
        &self,
        _tenant_id: TenantId,
        integration_id: IntegrationId,
        external_id: &str,
    ) -> AppResult<Option<SyncedRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&(integration_id, external_id.to_owned()))
            .cloned())
    }

    async fn list_records(
        &self,
        _tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Vec<SyncedRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|record| record.integration_id == integration_id)
            .cloned()
            .collect())
    }

    async fn list_enrichments(
        &self,
        _tenant_id: TenantId,
        integration_id: IntegrationId,
        parent_external_id: &str,
    ) -> AppResult<Vec<EnrichmentRecord>> {
        Ok(self
            .enrichments
            .lock()
            .await
            .get(&(integration_id, parent_external_id.to_owned()))
            .cloned()
            .unwrap_or_default())
    }

    async fn max_recency(
        &self,
        _tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Option<RecencyValue>> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|record| record.integration_id == integration_id)
            .filter_map(|record| record.recency)
            .max())
    }
}

/// Vendor fake answering from a script and recording every request.
#[derive(Default)]
pub struct ScriptedVendorClient {
    responses: Mutex<VecDeque<AppResult<VendorPage>>>,
    pub requests: Mutex<Vec<VendorRequest>>,
}

impl ScriptedVendorClient {
    pub async fn respond(&self, status: u16, body: Value) {
        self.respond_with_headers(status, HeaderMap::new(), body)
            .await;
    }

    pub async fn respond_with_link(&self, body: Value, next: &str) {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::LINK,
            HeaderValue::from_str(&format!("<{next}>; rel=\"next\""))
                .unwrap_or_else(|_| unreachable!()),
        );
        self.respond_with_headers(200, headers, body).await;
    }

    pub async fn respond_with_headers(&self, status: u16, headers: HeaderMap, body: Value) {
        self.responses.lock().await.push_back(Ok(VendorPage {
            status,
            headers,
            body,
        }));
    }

    pub async fn fail_transport(&self) {
        self.responses
            .lock()
            .await
            .push_back(Err(AppError::Transport("connection reset".to_owned())));
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl VendorClient for ScriptedVendorClient {
    async fn send(&self, request: &VendorRequest) -> AppResult<VendorPage> {
        self.requests.lock().await.push(request.clone());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Internal("no scripted vendor response".to_owned())))
    }
}

#[derive(Default)]
pub struct FakeSyncJobQueue {
    pub enqueued: Mutex<Vec<SyncJobRequest>>,
    pub completed: Mutex<Vec<String>>,
    pub failed: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SyncJobQueue for FakeSyncJobQueue {
    async fn enqueue_backfill(&self, request: SyncJobRequest) -> AppResult<String> {
        let mut enqueued = self.enqueued.lock().await;
        enqueued.push(request);
        Ok(format!("job-{}", enqueued.len()))
    }

    async fn claim_jobs(
        &self,
        worker_id: &str,
        limit: usize,
        _lease_seconds: u32,
    ) -> AppResult<Vec<ClaimedSyncJob>> {
        let mut enqueued = self.enqueued.lock().await;
        let take = limit.min(enqueued.len());
        Ok(enqueued
            .drain(..take)
            .enumerate()
            .map(|(index, request)| ClaimedSyncJob {
                job_id: format!("claimed-{index}"),
                tenant_id: request.tenant_id,
                integration_id: request.integration_id,
                mode: request.mode,
                cascade: request.cascade,
                lease_token: format!("{worker_id}-lease-{index}"),
            })
            .collect())
    }

    async fn complete_job(
        &self,
        _tenant_id: TenantId,
        job_id: &str,
        _worker_id: &str,
        _lease_token: &str,
    ) -> AppResult<()> {
        self.completed.lock().await.push(job_id.to_owned());
        Ok(())
    }

    async fn fail_job(
        &self,
        _tenant_id: TenantId,
        job_id: &str,
        _worker_id: &str,
        _lease_token: &str,
        error_message: &str,
    ) -> AppResult<()> {
        self.failed
            .lock()
            .await
            .push((job_id.to_owned(), error_message.to_owned()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeChangePublisher {
    pub changes: Mutex<Vec<RecordChange>>,
}

impl FakeChangePublisher {
    /// Waits for background publishes until `expected` changes arrived or the
    /// scheduler ran out of patience, then returns what was received.
    pub async fn received(&self, expected: usize) -> Vec<RecordChange> {
        for _ in 0..1_000 {
            {
                let changes = self.changes.lock().await;
                if changes.len() >= expected {
                    return changes.clone();
                }
            }
            tokio::task::yield_now().await;
        }
        self.changes.lock().await.clone()
    }
}

/// Publisher whose sends never complete.
pub struct StalledChangePublisher;

#[async_trait]
impl RecordChangePublisher for StalledChangePublisher {
    async fn publish(&self, _change: RecordChange) -> AppResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[async_trait]
impl RecordChangePublisher for FakeChangePublisher {
    async fn publish(&self, change: RecordChange) -> AppResult<()> {
        self.changes.lock().await.push(change);
        Ok(())
    }
}
