use std::sync::Arc;
use std::time::Duration;

use mirrorline_application::{DescriptorRegistry, RecordChangePublisher, RetryPolicy};
use mirrorline_core::AppError;
use mirrorline_infrastructure::{
    AesCredentialCipher, PostgresIntegrationRepository, PostgresRecordRepository,
    PostgresSyncJobQueue, RedisRecordChangePublisher, ReqwestVendorClient,
    TracingRecordChangePublisher,
};
use sqlx::PgPool;
use tracing::info;

use crate::api_config::ApiConfig;
use crate::state::{AppState, ServicePorts};

use super::redis::build_redis_client;

pub fn build_app_state(pool: PgPool, config: &ApiConfig) -> Result<AppState, AppError> {
    let redis_client = config
        .redis_url
        .as_deref()
        .map(build_redis_client)
        .transpose()?;

    let cipher = AesCredentialCipher::from_hex(&config.credential_encryption_key)?;
    let publisher: Arc<dyn RecordChangePublisher> = match redis_client.clone() {
        Some(client) => {
            info!(prefix = %config.redis_key_prefix, "publishing record changes to redis");
            Arc::new(RedisRecordChangePublisher::new(
                client,
                config.redis_key_prefix.clone(),
            ))
        }
        None => Arc::new(TracingRecordChangePublisher),
    };
    let vendor = ReqwestVendorClient::with_timeout(Duration::from_secs(
        config.vendor_http_timeout_seconds,
    ))?;

    let ports = ServicePorts {
        integrations: Arc::new(PostgresIntegrationRepository::new(pool.clone(), cipher)),
        records: Arc::new(PostgresRecordRepository::new(pool.clone())),
        jobs: Arc::new(PostgresSyncJobQueue::new(pool.clone())),
        vendor: Arc::new(vendor),
        publisher,
    };

    let state = AppState::from_ports(
        DescriptorRegistry::reference()?,
        ports,
        &config.public_base_url,
        RetryPolicy {
            max_retries: config.backfill_max_retries,
            backoff_ms: config.backfill_retry_backoff_ms,
        },
        &config.internal_shared_secret,
    );

    Ok(state.with_health_targets(Some(pool), redis_client))
}
