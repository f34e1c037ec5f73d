use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mirrorline_core::{AppError, AppResult};
use mirrorline_domain::{
    BackfillMode, BackfillSpec, CREDENTIAL_BASE_URL, Integration, IntegrationId, RecencyValue,
    ResourceDescriptor, UpsertOutcome,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    DependencyGraph, DescriptorRegistry, IntegrationRepository, RecordRepository, SyncJobQueue,
    SyncJobRequest, VendorClient,
};

mod crawl;

/// Retry budget for one page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base wait, multiplied by the attempt number.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 500,
        }
    }
}

/// Summary of one backfill run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Integration that was crawled.
    pub integration_id: IntegrationId,
    /// Mode actually used.
    pub mode: BackfillMode,
    /// Pages fetched.
    pub pages: u32,
    /// New records stored.
    pub inserted: u64,
    /// Stored records replaced.
    pub replaced: u64,
    /// Candidates older than the stored record.
    pub skipped: u64,
    /// Items that could not be parsed.
    pub malformed_items: u64,
    /// Whether an incremental run stopped at the low-water-mark.
    pub stopped_early: bool,
    /// Whether the stored low-water-mark was advanced.
    pub watermark_advanced: bool,
    /// Dependent integrations enqueued.
    pub cascaded: usize,
}

impl BackfillReport {
    fn new(integration_id: IntegrationId, mode: BackfillMode) -> Self {
        Self {
            integration_id,
            mode,
            pages: 0,
            inserted: 0,
            replaced: 0,
            skipped: 0,
            malformed_items: 0,
            stopped_early: false,
            watermark_advanced: false,
            cascaded: 0,
        }
    }

    fn count(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Replaced => self.replaced += 1,
            UpsertOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Returns how many records were written.
    #[must_use]
    pub fn stored(&self) -> u64 {
        self.inserted + self.replaced
    }
}

/// Vendor-agnostic paginated crawl with retry and dependency cascade.
#[derive(Clone)]
pub struct BackfillService {
    registry: DescriptorRegistry,
    graph: DependencyGraph,
    integrations: Arc<dyn IntegrationRepository>,
    records: Arc<dyn RecordRepository>,
    vendor: Arc<dyn VendorClient>,
    jobs: Arc<dyn SyncJobQueue>,
    retry: RetryPolicy,
}

struct CrawlPlan<'a> {
    descriptor: &'a ResourceDescriptor,
    backfill: &'a BackfillSpec,
    base_url: String,
    auth_headers: Vec<(String, String)>,
    low_water_mark: Option<RecencyValue>,
    mode: BackfillMode,
}

impl BackfillService {
    /// Creates a backfill service.
    #[must_use]
    pub fn new(
        registry: DescriptorRegistry,
        integrations: Arc<dyn IntegrationRepository>,
        records: Arc<dyn RecordRepository>,
        vendor: Arc<dyn VendorClient>,
        jobs: Arc<dyn SyncJobQueue>,
    ) -> Self {
        Self {
            graph: DependencyGraph::new(registry.clone(), integrations.clone()),
            registry,
            integrations,
            records,
            vendor,
            jobs,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the page retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Crawls the integration's list endpoint and stores every page.
    ///
    /// Fails with [`AppError::DependencyMissing`] before any request when the
    /// required ancestor is absent or unconfigured, and with
    /// [`AppError::CredentialsMissing`] when required secrets are absent.
    /// A transport failure beyond the retry budget aborts the run; pages
    /// already stored stay stored and the low-water-mark is left unchanged.
    pub async fn backfill(
        &self,
        integration: &Integration,
        mode: BackfillMode,
        cascade: bool,
    ) -> AppResult<BackfillReport> {
        let descriptor = self.registry.get(integration.resource_type())?;
        let backfill = descriptor.backfill().ok_or_else(|| {
            AppError::Validation(format!(
                "{} integrations cannot be backfilled",
                integration.resource_type()
            ))
        })?;

        let ancestor = self.graph.resolve(integration).await?;

        let missing = integration
            .credentials()
            .missing(descriptor.required_credentials());
        if !missing.is_empty() {
            return Err(AppError::CredentialsMissing(format!(
                "integration '{}' is missing credentials: {}",
                integration.id(),
                missing.join(", ")
            )));
        }

        let base_url = integration
            .credentials()
            .get(CREDENTIAL_BASE_URL)
            .map(str::to_owned)
            .or_else(|| backfill.default_base_url.clone())
            .ok_or_else(|| {
                AppError::CredentialsMissing(format!(
                    "integration '{}' has no base URL",
                    integration.id()
                ))
            })?;
        let auth_headers = descriptor.outbound_auth().headers(
            integration.credentials(),
            ancestor.as_ref().map(Integration::credentials),
        )?;

        let (mode, low_water_mark) = self.effective_mode(integration, backfill, mode).await?;
        let plan = CrawlPlan {
            descriptor: &descriptor,
            backfill,
            base_url,
            auth_headers,
            low_water_mark,
            mode,
        };

        info!(
            integration_id = %integration.id(),
            resource_type = %integration.resource_type(),
            mode = mode.as_str(),
            "backfill started"
        );

        let crawl = self.crawl(integration, &plan).await?;
        let mut report = crawl.report;

        if report.malformed_items == 0 {
            self.integrations
                .record_backfill_success(
                    integration.tenant_id(),
                    integration.id(),
                    crawl.high_water_mark,
                    Utc::now(),
                )
                .await?;
            report.watermark_advanced = true;
        } else {
            warn!(
                integration_id = %integration.id(),
                malformed_items = report.malformed_items,
                "backfill finished with malformed items, low-water-mark unchanged"
            );
        }

        if cascade {
            report.cascaded = self.enqueue_cascade(integration, mode).await?;
        }

        info!(
            integration_id = %integration.id(),
            pages = report.pages,
            inserted = report.inserted,
            replaced = report.replaced,
            skipped = report.skipped,
            cascaded = report.cascaded,
            "backfill finished"
        );

        Ok(report)
    }

    async fn effective_mode(
        &self,
        integration: &Integration,
        backfill: &BackfillSpec,
        requested: BackfillMode,
    ) -> AppResult<(BackfillMode, Option<RecencyValue>)> {
        if requested == BackfillMode::Full {
            return Ok((BackfillMode::Full, None));
        }

        if !backfill.descending_recency {
            info!(
                integration_id = %integration.id(),
                "vendor does not list newest first, running a full backfill"
            );
            return Ok((BackfillMode::Full, None));
        }

        let low_water_mark = match integration.last_backfilled_cursor() {
            Some(stored) => Some(stored),
            None => {
                self.records
                    .max_recency(integration.tenant_id(), integration.id())
                    .await?
            }
        };

        Ok(match low_water_mark {
            Some(low_water_mark) => (BackfillMode::Incremental, Some(low_water_mark)),
            None => (BackfillMode::Full, None),
        })
    }

    async fn enqueue_cascade(&self, integration: &Integration, mode: BackfillMode) -> AppResult<usize> {
        let targets = self.graph.cascade_targets(integration).await?;
        for target in &targets {
            let job_id = self
                .jobs
                .enqueue_backfill(SyncJobRequest {
                    tenant_id: target.tenant_id(),
                    integration_id: target.id(),
                    mode,
                    cascade: true,
                })
                .await?;
            info!(
                integration_id = %integration.id(),
                dependent_id = %target.id(),
                job_id = %job_id,
                "cascade backfill enqueued"
            );
        }

        Ok(targets.len())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}
