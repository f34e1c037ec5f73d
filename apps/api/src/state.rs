use std::sync::Arc;

use mirrorline_application::{
    BackfillService, DescriptorRegistry, IntegrationRepository, IntegrationService,
    RecordChangePublisher, RecordRepository, RetryPolicy, SetupService, SyncJobQueue,
    SyncJobService, VendorClient, WebhookService,
};
use sqlx::PgPool;

/// Adapters the API services are composed from.
#[derive(Clone)]
pub struct ServicePorts {
    pub integrations: Arc<dyn IntegrationRepository>,
    pub records: Arc<dyn RecordRepository>,
    pub jobs: Arc<dyn SyncJobQueue>,
    pub vendor: Arc<dyn VendorClient>,
    pub publisher: Arc<dyn RecordChangePublisher>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub integration_service: IntegrationService,
    pub setup_service: SetupService,
    pub webhook_service: WebhookService,
    pub sync_job_service: SyncJobService,
    pub public_base_url: Arc<str>,
    pub internal_shared_secret: Arc<str>,
    pub postgres_pool: Option<PgPool>,
    pub redis_client: Option<redis::Client>,
}

impl AppState {
    pub fn from_ports(
        registry: DescriptorRegistry,
        ports: ServicePorts,
        public_base_url: &str,
        retry_policy: RetryPolicy,
        internal_shared_secret: &str,
    ) -> Self {
        let backfill = BackfillService::new(
            registry.clone(),
            ports.integrations.clone(),
            ports.records.clone(),
            ports.vendor.clone(),
            ports.jobs.clone(),
        )
        .with_retry_policy(retry_policy);

        Self {
            integration_service: IntegrationService::new(
                registry.clone(),
                ports.integrations.clone(),
            ),
            setup_service: SetupService::new(
                registry.clone(),
                ports.integrations.clone(),
                ports.vendor,
                public_base_url,
            ),
            webhook_service: WebhookService::new(
                registry,
                ports.integrations.clone(),
                ports.records,
                ports.jobs.clone(),
                ports.publisher,
            ),
            sync_job_service: SyncJobService::new(backfill, ports.integrations, ports.jobs),
            public_base_url: Arc::from(public_base_url),
            internal_shared_secret: Arc::from(internal_shared_secret),
            postgres_pool: None,
            redis_client: None,
        }
    }

    /// Attaches the dependencies probed by `/health`.
    pub fn with_health_targets(
        mut self,
        postgres_pool: Option<PgPool>,
        redis_client: Option<redis::Client>,
    ) -> Self {
        self.postgres_pool = postgres_pool;
        self.redis_client = redis_client;
        self
    }
}
