use async_trait::async_trait;
use mirrorline_core::{AppResult, TenantId};
use mirrorline_domain::{BackfillMode, IntegrationId};

/// Backfill job to enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncJobRequest {
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Integration to backfill.
    pub integration_id: IntegrationId,
    /// Crawl mode.
    pub mode: BackfillMode,
    /// Whether dependents are enqueued after success.
    pub cascade: bool,
}

/// Leased job handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedSyncJob {
    /// Job identifier.
    pub job_id: String,
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Integration to backfill.
    pub integration_id: IntegrationId,
    /// Crawl mode.
    pub mode: BackfillMode,
    /// Whether dependents are enqueued after success.
    pub cascade: bool,
    /// Lease token fencing completion.
    pub lease_token: String,
}

/// Queue port for asynchronous backfill requests.
#[async_trait]
pub trait SyncJobQueue: Send + Sync {
    /// Enqueues one backfill and returns the job id.
    async fn enqueue_backfill(&self, request: SyncJobRequest) -> AppResult<String>;

    /// Claims pending or lease-expired jobs for one worker.
    async fn claim_jobs(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<ClaimedSyncJob>>;

    /// Marks one leased job as completed.
    async fn complete_job(
        &self,
        tenant_id: TenantId,
        job_id: &str,
        worker_id: &str,
        lease_token: &str,
    ) -> AppResult<()>;

    /// Marks one leased job as failed with an error message.
    async fn fail_job(
        &self,
        tenant_id: TenantId,
        job_id: &str,
        worker_id: &str,
        lease_token: &str,
        error_message: &str,
    ) -> AppResult<()>;
}
