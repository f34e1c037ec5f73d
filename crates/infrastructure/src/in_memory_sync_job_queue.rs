use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mirrorline_application::{ClaimedSyncJob, SyncJobQueue, SyncJobRequest};
use mirrorline_core::{AppError, AppResult, TenantId};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Pending,
    Leased,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct QueuedJob {
    id: String,
    request: SyncJobRequest,
    status: JobStatus,
    leased_by: Option<String>,
    lease_token: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl QueuedJob {
    fn claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Leased => self
                .lease_expires_at
                .is_some_and(|expires_at| expires_at < now),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    fn holds_lease(&self, tenant_id: TenantId, worker_id: &str, lease_token: &str) -> bool {
        self.status == JobStatus::Leased
            && self.request.tenant_id == tenant_id
            && self.leased_by.as_deref() == Some(worker_id)
            && self.lease_token.as_deref() == Some(lease_token)
    }

    fn release(&mut self, status: JobStatus) {
        self.status = status;
        self.leased_by = None;
        self.lease_token = None;
        self.lease_expires_at = None;
    }
}

/// In-memory backfill job queue with the same lease semantics as the
/// PostgreSQL queue.
#[derive(Debug, Default)]
pub struct InMemorySyncJobQueue {
    jobs: Mutex<Vec<QueuedJob>>,
}

impl InMemorySyncJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the requests that are still waiting for a worker.
    pub async fn pending_requests(&self) -> Vec<SyncJobRequest> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .map(|job| job.request)
            .collect()
    }

    /// Returns the recorded error of a failed job.
    pub async fn last_error(&self, job_id: &str) -> Option<String> {
        self.jobs
            .lock()
            .await
            .iter()
            .find(|job| job.id == job_id)
            .and_then(|job| job.last_error.clone())
    }

    async fn release_job(
        &self,
        tenant_id: TenantId,
        job_id: &str,
        worker_id: &str,
        lease_token: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> AppResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|job| job.id == job_id && job.holds_lease(tenant_id, worker_id, lease_token))
            .ok_or_else(|| {
                AppError::Conflict(format!(
                    "sync job '{job_id}' is not currently leased by worker '{worker_id}' with matching lease token"
                ))
            })?;

        job.release(status);
        job.last_error = error_message.map(str::to_owned);
        Ok(())
    }
}

#[async_trait]
impl SyncJobQueue for InMemorySyncJobQueue {
    async fn enqueue_backfill(&self, request: SyncJobRequest) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        self.jobs.lock().await.push(QueuedJob {
            id: id.clone(),
            request,
            status: JobStatus::Pending,
            leased_by: None,
            lease_token: None,
            lease_expires_at: None,
            last_error: None,
        });
        Ok(id)
    }

    async fn claim_jobs(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<ClaimedSyncJob>> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(i64::from(lease_seconds));
        let mut jobs = self.jobs.lock().await;

        Ok(jobs
            .iter_mut()
            .filter(|job| job.claimable(now))
            .take(limit)
            .map(|job| {
                let lease_token = Uuid::new_v4().to_string();
                job.status = JobStatus::Leased;
                job.leased_by = Some(worker_id.to_owned());
                job.lease_token = Some(lease_token.clone());
                job.lease_expires_at = Some(expires_at);
                job.last_error = None;

                ClaimedSyncJob {
                    job_id: job.id.clone(),
                    tenant_id: job.request.tenant_id,
                    integration_id: job.request.integration_id,
                    mode: job.request.mode,
                    cascade: job.request.cascade,
                    lease_token,
                }
            })
            .collect())
    }

    async fn complete_job(
        &self,
        tenant_id: TenantId,
        job_id: &str,
        worker_id: &str,
        lease_token: &str,
    ) -> AppResult<()> {
        self.release_job(
            tenant_id,
            job_id,
            worker_id,
            lease_token,
            JobStatus::Completed,
            None,
        )
        .await
    }

    async fn fail_job(
        &self,
        tenant_id: TenantId,
        job_id: &str,
        worker_id: &str,
        lease_token: &str,
        error_message: &str,
    ) -> AppResult<()> {
        self.release_job(
            tenant_id,
            job_id,
            worker_id,
            lease_token,
            JobStatus::Failed,
            Some(error_message),
        )
        .await
    }
}
