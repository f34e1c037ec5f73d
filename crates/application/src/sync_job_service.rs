use std::sync::Arc;

use mirrorline_core::{AppError, AppResult, TenantId};
use mirrorline_domain::{BackfillMode, IntegrationId, OpaqueId};
use tracing::{info, warn};

use crate::{
    BackfillReport, BackfillService, ClaimedSyncJob, IntegrationRepository, SyncJobQueue,
    SyncJobRequest,
};

/// Queues backfills and runs claimed jobs on workers.
#[derive(Clone)]
pub struct SyncJobService {
    backfill: BackfillService,
    integrations: Arc<dyn IntegrationRepository>,
    jobs: Arc<dyn SyncJobQueue>,
}

impl SyncJobService {
    /// Creates a sync job service.
    #[must_use]
    pub fn new(
        backfill: BackfillService,
        integrations: Arc<dyn IntegrationRepository>,
        jobs: Arc<dyn SyncJobQueue>,
    ) -> Self {
        Self {
            backfill,
            integrations,
            jobs,
        }
    }

    /// Enqueues one backfill for an integration.
    pub async fn enqueue(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        mode: BackfillMode,
        cascade: bool,
    ) -> AppResult<String> {
        self.integrations
            .find_integration(tenant_id, integration_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("integration '{integration_id}'")))?;

        self.jobs
            .enqueue_backfill(SyncJobRequest {
                tenant_id,
                integration_id,
                mode,
                cascade,
            })
            .await
    }

    /// Enqueues one backfill for the integration behind an opaque id.
    pub async fn enqueue_for_opaque_id(
        &self,
        opaque_id: &OpaqueId,
        mode: BackfillMode,
        cascade: bool,
    ) -> AppResult<String> {
        let integration = self
            .integrations
            .find_by_opaque_id(opaque_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("integration '{opaque_id}'")))?;

        let job_id = self
            .jobs
            .enqueue_backfill(SyncJobRequest {
                tenant_id: integration.tenant_id(),
                integration_id: integration.id(),
                mode,
                cascade,
            })
            .await?;
        info!(
            integration_id = %integration.id(),
            job_id = %job_id,
            mode = mode.as_str(),
            "backfill enqueued"
        );
        Ok(job_id)
    }

    /// Claims queued backfill jobs for one worker.
    pub async fn claim_jobs_for_worker(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<ClaimedSyncJob>> {
        if worker_id.trim().is_empty() {
            return Err(AppError::Validation(
                "worker_id must not be empty".to_owned(),
            ));
        }

        if limit == 0 {
            return Err(AppError::Validation(
                "limit must be greater than zero".to_owned(),
            ));
        }

        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "lease_seconds must be greater than zero".to_owned(),
            ));
        }

        self.jobs.claim_jobs(worker_id, limit, lease_seconds).await
    }

    /// Runs one claimed job and finalizes its queue state.
    pub async fn execute_claimed_job(
        &self,
        worker_id: &str,
        job: ClaimedSyncJob,
    ) -> AppResult<BackfillReport> {
        if worker_id.trim().is_empty() {
            return Err(AppError::Validation(
                "worker_id must not be empty".to_owned(),
            ));
        }

        if job.lease_token.trim().is_empty() {
            return Err(AppError::Validation(
                "claimed sync job lease_token must not be empty".to_owned(),
            ));
        }

        let result = match self
            .integrations
            .find_integration(job.tenant_id, job.integration_id)
            .await
        {
            Ok(Some(integration)) => {
                self.backfill
                    .backfill(&integration, job.mode, job.cascade)
                    .await
            }
            Ok(None) => Err(AppError::NotFound(format!(
                "integration '{}' no longer exists",
                job.integration_id
            ))),
            Err(error) => Err(error),
        };

        match result {
            Ok(report) => {
                self.jobs
                    .complete_job(
                        job.tenant_id,
                        job.job_id.as_str(),
                        worker_id,
                        job.lease_token.as_str(),
                    )
                    .await?;
                Ok(report)
            }
            Err(error) => {
                let error_message = error.to_string();
                warn!(
                    job_id = %job.job_id,
                    integration_id = %job.integration_id,
                    error = %error_message,
                    "backfill job failed"
                );
                if let Err(mark_error) = self
                    .jobs
                    .fail_job(
                        job.tenant_id,
                        job.job_id.as_str(),
                        worker_id,
                        job.lease_token.as_str(),
                        error_message.as_str(),
                    )
                    .await
                {
                    return Err(AppError::Internal(format!(
                        "failed to execute sync job '{}': {error}; additionally failed to mark queue job failed: {mark_error}",
                        job.job_id
                    )));
                }

                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mirrorline_core::{AppError, TenantId};
    use mirrorline_domain::{
        BackfillMode, CREDENTIAL_BACKFILL_SECRET, Integration, ResourceType, catalog,
    };
    use serde_json::json;

    use super::SyncJobService;
    use crate::test_support::{
        FakeIntegrationRepository, FakeRecordRepository, FakeSyncJobQueue, ScriptedVendorClient,
    };
    use crate::{BackfillService, DescriptorRegistry, RetryPolicy};

    struct Harness {
        integrations: Arc<FakeIntegrationRepository>,
        vendor: Arc<ScriptedVendorClient>,
        jobs: Arc<FakeSyncJobQueue>,
        service: SyncJobService,
    }

    fn harness() -> Harness {
        let integrations = Arc::new(FakeIntegrationRepository::default());
        let vendor = Arc::new(ScriptedVendorClient::default());
        let jobs = Arc::new(FakeSyncJobQueue::default());
        let backfill = BackfillService::new(
            DescriptorRegistry::reference().unwrap_or_else(|_| unreachable!()),
            integrations.clone(),
            Arc::new(FakeRecordRepository::default()),
            vendor.clone(),
            jobs.clone(),
        )
        .with_retry_policy(RetryPolicy {
            max_retries: 0,
            backoff_ms: 0,
        });

        Harness {
            service: SyncJobService::new(backfill, integrations.clone(), jobs.clone()),
            integrations,
            vendor,
            jobs,
        }
    }

    async fn billing(harness: &Harness) -> Integration {
        let mut integration = Integration::new(
            TenantId::new(),
            ResourceType::new(catalog::BILLING_SUBSCRIPTION).unwrap_or_else(|_| unreachable!()),
        );
        integration.set_credential(CREDENTIAL_BACKFILL_SECRET, "sk_test");
        harness.integrations.insert(integration.clone()).await;
        integration
    }

    #[tokio::test]
    async fn claim_validates_worker_arguments() {
        let harness = harness();
        assert!(matches!(
            harness.service.claim_jobs_for_worker(" ", 1, 30).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            harness.service.claim_jobs_for_worker("worker-1", 0, 30).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            harness.service.claim_jobs_for_worker("worker-1", 1, 0).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn claimed_job_runs_backfill_and_completes() {
        let harness = harness();
        let integration = billing(&harness).await;
        harness
            .service
            .enqueue_for_opaque_id(integration.opaque_id(), BackfillMode::Full, false)
            .await
            .unwrap_or_else(|_| unreachable!());
        harness
            .vendor
            .respond(
                200,
                json!({"data": [{"id": "sub_1", "updated": 1_700_000_000}], "has_more": false}),
            )
            .await;

        let jobs = harness
            .service
            .claim_jobs_for_worker("worker-1", 5, 30)
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(jobs.len(), 1);

        let report = harness
            .service
            .execute_claimed_job("worker-1", jobs[0].clone())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(report.inserted, 1);
        assert_eq!(harness.jobs.completed.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_backfill_marks_the_job_failed() {
        let harness = harness();
        let integration = billing(&harness).await;
        harness
            .service
            .enqueue(
                integration.tenant_id(),
                integration.id(),
                BackfillMode::Full,
                true,
            )
            .await
            .unwrap_or_else(|_| unreachable!());
        harness.vendor.respond(500, json!({})).await;

        let jobs = harness
            .service
            .claim_jobs_for_worker("worker-1", 5, 30)
            .await
            .unwrap_or_else(|_| unreachable!());
        let result = harness
            .service
            .execute_claimed_job("worker-1", jobs[0].clone())
            .await;
        assert!(matches!(result, Err(AppError::Transport(_))));

        let failed = harness.jobs.failed.lock().await.clone();
        assert_eq!(failed.len(), 1);
        assert!(harness.jobs.completed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn enqueue_requires_an_existing_integration() {
        let harness = harness();
        let result = harness
            .service
            .enqueue(
                TenantId::new(),
                mirrorline_domain::IntegrationId::new(),
                BackfillMode::Full,
                false,
            )
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
