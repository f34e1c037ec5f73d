//! Mirrorline backfill worker runtime.

#![forbid(unsafe_code)]

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use mirrorline_application::{BackfillService, DescriptorRegistry, RetryPolicy, SyncJobService};
use mirrorline_core::{AppError, AppResult};
use mirrorline_infrastructure::{
    AesCredentialCipher, PostgresIntegrationRepository, PostgresRecordRepository,
    PostgresSyncJobQueue, ReqwestVendorClient,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    worker_id: String,
    claim_limit: usize,
    lease_seconds: u32,
    poll_interval_ms: u64,
    credential_encryption_key: String,
    vendor_http_timeout_seconds: u64,
    backfill_max_retries: u32,
    backfill_retry_backoff_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let sync_job_service = build_sync_job_service(pool, &config)?;

    info!(
        worker_id = %config.worker_id,
        claim_limit = config.claim_limit,
        lease_seconds = config.lease_seconds,
        poll_interval_ms = config.poll_interval_ms,
        "mirrorline-worker started"
    );

    loop {
        match sync_job_service
            .claim_jobs_for_worker(
                config.worker_id.as_str(),
                config.claim_limit,
                config.lease_seconds,
            )
            .await
        {
            Ok(claimed_jobs) => {
                if claimed_jobs.is_empty() {
                    tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
                    continue;
                }

                info!(
                    worker_id = %config.worker_id,
                    claimed_count = claimed_jobs.len(),
                    "claimed backfill jobs"
                );

                let mut executed_jobs = 0_u32;
                let mut failed_jobs = 0_u32;
                for claimed_job in claimed_jobs {
                    let job_id = claimed_job.job_id.clone();
                    let integration_id = claimed_job.integration_id;

                    match sync_job_service
                        .execute_claimed_job(config.worker_id.as_str(), claimed_job)
                        .await
                    {
                        Ok(report) => {
                            executed_jobs = executed_jobs.saturating_add(1);
                            info!(
                                worker_id = %config.worker_id,
                                job_id = %job_id,
                                integration_id = %integration_id,
                                mode = report.mode.as_str(),
                                pages = report.pages,
                                inserted = report.inserted,
                                replaced = report.replaced,
                                cascaded = report.cascaded,
                                "backfill job executed"
                            );
                        }
                        Err(error) => {
                            failed_jobs = failed_jobs.saturating_add(1);
                            warn!(
                                worker_id = %config.worker_id,
                                job_id = %job_id,
                                integration_id = %integration_id,
                                error = %error,
                                "backfill job execution failed"
                            );
                        }
                    }
                }

                info!(
                    worker_id = %config.worker_id,
                    executed_jobs,
                    failed_jobs,
                    "backfill batch finished"
                );
            }
            Err(error) => {
                warn!(
                    worker_id = %config.worker_id,
                    error = %error,
                    "failed to claim backfill jobs"
                );
                tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
            }
        }
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_sync_job_service(pool: PgPool, config: &WorkerConfig) -> AppResult<SyncJobService> {
    let cipher = AesCredentialCipher::from_hex(&config.credential_encryption_key)?;
    let integrations = Arc::new(PostgresIntegrationRepository::new(pool.clone(), cipher));
    let jobs = Arc::new(PostgresSyncJobQueue::new(pool.clone()));
    let records = Arc::new(PostgresRecordRepository::new(pool));
    let vendor = Arc::new(ReqwestVendorClient::with_timeout(Duration::from_secs(
        config.vendor_http_timeout_seconds,
    ))?);

    let backfill = BackfillService::new(
        DescriptorRegistry::reference()?,
        integrations.clone(),
        records,
        vendor,
        jobs.clone(),
    )
    .with_retry_policy(RetryPolicy {
        max_retries: config.backfill_max_retries,
        backoff_ms: config.backfill_retry_backoff_ms,
    });

    Ok(SyncJobService::new(backfill, integrations, jobs))
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let database_url = required_non_empty(&lookup, "DATABASE_URL")?;
        let worker_id = lookup("WORKER_ID")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let claim_limit = parse_env(&lookup, "WORKER_CLAIM_LIMIT", 10_usize)?;
        let lease_seconds = parse_env(&lookup, "WORKER_LEASE_SECONDS", 300_u32)?;
        let poll_interval_ms = parse_env(&lookup, "WORKER_POLL_INTERVAL_MS", 1500_u64)?;
        let credential_encryption_key = required_non_empty(&lookup, "CREDENTIAL_ENCRYPTION_KEY")?;
        let vendor_http_timeout_seconds =
            parse_env(&lookup, "VENDOR_HTTP_TIMEOUT_SECONDS", 20_u64)?;
        let backfill_max_retries = parse_env(&lookup, "BACKFILL_MAX_RETRIES", 2_u32)?;
        let backfill_retry_backoff_ms = parse_env(&lookup, "BACKFILL_RETRY_BACKOFF_MS", 500_u64)?;

        if claim_limit == 0 {
            return Err(AppError::Validation(
                "WORKER_CLAIM_LIMIT must be greater than zero".to_owned(),
            ));
        }

        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "WORKER_LEASE_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "WORKER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if vendor_http_timeout_seconds == 0 {
            return Err(AppError::Validation(
                "VENDOR_HTTP_TIMEOUT_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            worker_id,
            claim_limit,
            lease_seconds,
            poll_interval_ms,
            credential_encryption_key,
            vendor_http_timeout_seconds,
            backfill_max_retries,
            backfill_retry_backoff_ms,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> AppResult<String> {
    let value = lookup(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
