use async_trait::async_trait;
use mirrorline_application::{ClaimedSyncJob, SyncJobQueue, SyncJobRequest};
use mirrorline_core::{AppError, AppResult, TenantId};
use mirrorline_domain::{BackfillMode, IntegrationId};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;


/// PostgreSQL-backed backfill job queue with leased claims.
#[derive(Clone)]
pub struct PostgresSyncJobQueue {
    pool: PgPool,
}

impl PostgresSyncJobQueue {
    /// Creates a queue with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ClaimedSyncJobRow {
    id: Uuid,
    tenant_id: Uuid,
    integration_id: Uuid,
    mode: String,
    cascade_dependents: bool,
    lease_token: Option<String>,
}

fn claimed_sync_job_from_row(row: ClaimedSyncJobRow) -> AppResult<ClaimedSyncJob> {
    let lease_token = row.lease_token.ok_or_else(|| {
        AppError::Internal(format!("claimed sync job '{}' is missing its lease token", row.id))
    })?;

    Ok(ClaimedSyncJob {
        job_id: row.id.to_string(),
        tenant_id: TenantId::from_uuid(row.tenant_id),
        integration_id: IntegrationId::from_uuid(row.integration_id),
        mode: BackfillMode::parse(row.mode.as_str())?,
        cascade: row.cascade_dependents,
        lease_token,
    })
}

fn parse_job_id(job_id: &str) -> AppResult<Uuid> {
    Uuid::parse_str(job_id)
        .map_err(|error| AppError::Validation(format!("invalid sync job id '{job_id}': {error}")))
}

#[async_trait]
impl SyncJobQueue for PostgresSyncJobQueue {
    async fn enqueue_backfill(&self, request: SyncJobRequest) -> AppResult<String> {
        let job_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO sync_jobs (
                tenant_id,
                integration_id,
                mode,
                cascade_dependents,
                status,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, 'pending', now(), now())
            RETURNING id
            "#,
        )
        .bind(request.tenant_id.as_uuid())
        .bind(request.integration_id.as_uuid())
        .bind(request.mode.as_str())
        .bind(request.cascade)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to enqueue backfill for integration '{}' tenant '{}': {error}",
                request.integration_id, request.tenant_id
            ))
        })?;

        Ok(job_id.to_string())
    }

    async fn claim_jobs(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<ClaimedSyncJob>> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin sync job claim transaction: {error}"))
        })?;

        let claim_rows = sqlx::query_as::<_, ClaimedSyncJobRow>(
            r#"
            WITH candidate_jobs AS (
                SELECT id
                FROM sync_jobs
                WHERE status = 'pending'
                   OR (status = 'leased' AND lease_expires_at < now())
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ),
            leased_jobs AS (
                UPDATE sync_jobs jobs
                SET
                    status = 'leased',
                    leased_by = $2,
                    lease_token = gen_random_uuid()::TEXT,
                    lease_expires_at = now() + make_interval(secs => $3::INT),
                    updated_at = now(),
                    last_error = NULL
                FROM candidate_jobs
                WHERE jobs.id = candidate_jobs.id
                RETURNING
                    jobs.id,
                    jobs.tenant_id,
                    jobs.integration_id,
                    jobs.mode,
                    jobs.cascade_dependents,
                    jobs.lease_token,
                    jobs.created_at
            )
            SELECT
                id,
                tenant_id,
                integration_id,
                mode,
                cascade_dependents,
                lease_token
            FROM leased_jobs
            ORDER BY created_at
            "#,
        )
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid sync job claim limit: {error}"))
        })?)
        .bind(worker_id)
        .bind(i32::try_from(lease_seconds).map_err(|error| {
            AppError::Validation(format!("invalid sync job lease_seconds: {error}"))
        })?)
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to claim sync jobs for worker '{worker_id}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit sync job claim transaction: {error}"))
        })?;

        claim_rows
            .into_iter()
            .map(claimed_sync_job_from_row)
            .collect()
    }

    async fn complete_job(
        &self,
        tenant_id: TenantId,
        job_id: &str,
        worker_id: &str,
        lease_token: &str,
    ) -> AppResult<()> {
        let job_uuid = parse_job_id(job_id)?;

        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET
                status = 'completed',
                leased_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            WHERE tenant_id = $1
              AND id = $2
              AND leased_by = $3
              AND lease_token = $4
              AND status = 'leased'
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(job_uuid)
        .bind(worker_id)
        .bind(lease_token)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to complete sync job '{job_id}' for worker '{worker_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "sync job '{job_id}' is not currently leased by worker '{worker_id}' with matching lease token"
            )));
        }

        Ok(())
    }

    async fn fail_job(
        &self,
        tenant_id: TenantId,
        job_id: &str,
        worker_id: &str,
        lease_token: &str,
        error_message: &str,
    ) -> AppResult<()> {
        let job_uuid = parse_job_id(job_id)?;

        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET
                status = 'failed',
                leased_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL,
                updated_at = now(),
                last_error = $5
            WHERE tenant_id = $1
              AND id = $2
              AND leased_by = $3
              AND lease_token = $4
              AND status = 'leased'
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(job_uuid)
        .bind(worker_id)
        .bind(lease_token)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to mark sync job '{job_id}' as failed for worker '{worker_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "sync job '{job_id}' is not currently leased by worker '{worker_id}' with matching lease token"
            )));
        }

        Ok(())
    }
}
