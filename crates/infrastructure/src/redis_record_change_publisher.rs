//! Redis-backed record change notifications.

use std::sync::Arc;

use async_trait::async_trait;
use mirrorline_application::{RecordChange, RecordChangePublisher};
use mirrorline_core::{AppError, AppResult};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

/// Pushes record change notifications onto a Redis list for downstream consumers.
///
/// Every clone shares one reconnecting connection, opened on first publish.
#[derive(Clone)]
pub struct RedisRecordChangePublisher {
    client: redis::Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    key_prefix: String,
}

impl RedisRecordChangePublisher {
    /// Creates a publisher with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            connection: Arc::new(OnceCell::new()),
            key_prefix: key_prefix.into(),
        }
    }

    async fn connection(&self) -> AppResult<ConnectionManager> {
        self.connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .cloned()
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }

    /// Returns the list key notifications are pushed onto.
    #[must_use]
    pub fn list_key(&self) -> String {
        format!("{}:record_changed", self.key_prefix)
    }
}

#[async_trait]
impl RecordChangePublisher for RedisRecordChangePublisher {
    async fn publish(&self, change: RecordChange) -> AppResult<()> {
        let encoded = serde_json::to_string(&change).map_err(|error| {
            AppError::Internal(format!(
                "failed to encode record change for '{}': {error}",
                change.external_id
            ))
        })?;
        let mut connection = self.connection().await?;

        let _: i64 = connection
            .lpush(self.list_key(), encoded)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to push record change for '{}': {error}",
                    change.external_id
                ))
            })?;
        Ok(())
    }
}
