use async_trait::async_trait;
use mirrorline_application::{RecordChange, RecordChangePublisher};
use mirrorline_core::AppResult;
use tracing::info;

/// Logs record changes when no notification channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecordChangePublisher;

#[async_trait]
impl RecordChangePublisher for TracingRecordChangePublisher {
    async fn publish(&self, change: RecordChange) -> AppResult<()> {
        info!(
            integration_id = %change.integration_id,
            resource_type = %change.resource_type,
            external_id = %change.external_id,
            kind = ?change.kind,
            "record changed"
        );
        Ok(())
    }
}

/// Collects record changes in memory.
#[derive(Debug, Default)]
pub struct InMemoryRecordChangePublisher {
    changes: tokio::sync::Mutex<Vec<RecordChange>>,
}

impl InMemoryRecordChangePublisher {
    /// Creates an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every change published so far.
    pub async fn changes(&self) -> Vec<RecordChange> {
        self.changes.lock().await.clone()
    }

    /// Returns the published changes once at least `expected` arrived, yielding
    /// to background publishes for a bounded number of turns.
    pub async fn wait_for_changes(&self, expected: usize) -> Vec<RecordChange> {
        for _ in 0..1_000 {
            {
                let changes = self.changes.lock().await;
                if changes.len() >= expected {
                    return changes.clone();
                }
            }
            tokio::task::yield_now().await;
        }
        self.changes().await
    }
}

#[async_trait]
impl RecordChangePublisher for InMemoryRecordChangePublisher {
    async fn publish(&self, change: RecordChange) -> AppResult<()> {
        self.changes.lock().await.push(change);
        Ok(())
    }
}
