use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirrorline_application::{RecordRepository, UpsertResult};
use mirrorline_core::{AppResult, TenantId};
use mirrorline_domain::{
    EnrichmentRecord, IntegrationId, RecencyValue, Resolution, ResourceDescriptor, SyncedRecord,
    UpsertOutcome, plan_write,
};
use serde_json::Value;
use tokio::sync::Mutex;

type RecordKey = (TenantId, IntegrationId, String);

#[derive(Debug, Default)]
struct RecordStore {
    records: BTreeMap<RecordKey, SyncedRecord>,
    enrichments: BTreeMap<RecordKey, Vec<EnrichmentRecord>>,
}

/// In-memory record repository. One lock guards records and enrichments so
/// each candidate is applied atomically.
#[derive(Debug, Default)]
pub struct InMemoryRecordRepository {
    store: Mutex<RecordStore>,
}

impl InMemoryRecordRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn apply_candidate(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        descriptor: &ResourceDescriptor,
        candidate: Value,
        observed_at: DateTime<Utc>,
    ) -> AppResult<UpsertResult> {
        let external_id = descriptor.external_id(&candidate)?;
        let key = (tenant_id, integration_id, external_id.clone());
        let mut store = self.store.lock().await;

        let existing = store.records.get(&key);
        let plan = plan_write(descriptor, existing, candidate, observed_at)?;
        let outcome = match plan.resolution {
            Resolution::Skip => UpsertOutcome::Skipped,
            Resolution::Insert => UpsertOutcome::Inserted,
            Resolution::Replace => UpsertOutcome::Replaced,
        };
        if !outcome.wrote() {
            return Ok(UpsertResult {
                external_id,
                outcome,
            });
        }

        let removed_at = existing
            .and_then(|record| record.removed_at)
            .or_else(|| plan.draft.removed.then_some(observed_at));
        let enrichments = plan
            .draft
            .enrichments
            .into_iter()
            .map(|draft| EnrichmentRecord {
                integration_id,
                parent_external_id: external_id.clone(),
                enrichment: draft.enrichment,
                child_key: draft.child_key,
                payload: draft.payload,
            })
            .collect();
        let record = SyncedRecord {
            integration_id,
            external_id: external_id.clone(),
            recency: plan.draft.recency,
            payload: plan.draft.payload,
            projections: plan.draft.projections,
            removed_at,
            updated_at: observed_at,
        };

        store.enrichments.insert(key.clone(), enrichments);
        store.records.insert(key, record);

        Ok(UpsertResult {
            external_id,
            outcome,
        })
    }

    async fn mark_removed(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        external_ids: &[String],
        removed_at: DateTime<Utc>,
    ) -> AppResult<Vec<String>> {
        let mut store = self.store.lock().await;
        let mut removed = Vec::new();
        for external_id in external_ids {
            let key = (tenant_id, integration_id, external_id.clone());
            if let Some(record) = store.records.get_mut(&key)
                && record.removed_at.is_none()
            {
                record.removed_at = Some(removed_at);
                record.updated_at = removed_at;
                removed.push(external_id.clone());
            }
        }
        Ok(removed)
    }

    async fn find_record(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        external_id: &str,
    ) -> AppResult<Option<SyncedRecord>> {
        Ok(self
            .store
            .lock()
            .await
            .records
            .get(&(tenant_id, integration_id, external_id.to_owned()))
            .cloned())
    }

    async fn list_records(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Vec<SyncedRecord>> {
        Ok(self
            .store
            .lock()
            .await
            .records
            .iter()
            .filter(|((stored_tenant_id, stored_integration_id, _), _)| {
                *stored_tenant_id == tenant_id && *stored_integration_id == integration_id
            })
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn list_enrichments(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        parent_external_id: &str,
    ) -> AppResult<Vec<EnrichmentRecord>> {
        let mut enrichments = self
            .store
            .lock()
            .await
            .enrichments
            .get(&(tenant_id, integration_id, parent_external_id.to_owned()))
            .cloned()
            .unwrap_or_default();
        enrichments.sort_by(|left, right| {
            (left.child_key.as_str(), left.enrichment.as_str())
                .cmp(&(right.child_key.as_str(), right.enrichment.as_str()))
        });
        Ok(enrichments)
    }

    async fn max_recency(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Option<RecencyValue>> {
        Ok(self
            .store
            .lock()
            .await
            .records
            .iter()
            .filter(|((stored_tenant_id, stored_integration_id, _), _)| {
                *stored_tenant_id == tenant_id && *stored_integration_id == integration_id
            })
            .filter_map(|(_, record)| record.recency)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use mirrorline_application::RecordRepository;
    use mirrorline_core::TenantId;
    use mirrorline_domain::{IntegrationId, UpsertOutcome, catalog};
    use serde_json::json;

    use super::InMemoryRecordRepository;

    #[tokio::test]
    async fn concurrent_writers_keep_the_newest_payload() {
        let repository = Arc::new(InMemoryRecordRepository::new());
        let descriptor = Arc::new(catalog::helpdesk_ticket().unwrap_or_else(|_| unreachable!()));
        let tenant_id = TenantId::new();
        let integration_id = IntegrationId::new();

        let mut handles = Vec::new();
        for day in 1..=9 {
            let repository = repository.clone();
            let descriptor = descriptor.clone();
            handles.push(tokio::spawn(async move {
                repository
                    .apply_candidate(
                        tenant_id,
                        integration_id,
                        &descriptor,
                        json!({"id": 1, "subject": format!("v{day}"), "updated_at": format!("2024-05-0{day}T00:00:00Z")}),
                        Utc::now(),
                    )
                    .await
            }));
        }
        for handle in handles {
            assert!(matches!(handle.await, Ok(Ok(_))));
        }

        let stored = repository
            .find_record(tenant_id, integration_id, "1")
            .await
            .unwrap_or_else(|_| unreachable!())
            .unwrap_or_else(|| unreachable!());
        assert_eq!(stored.payload["subject"], json!("v9"));
    }

    #[tokio::test]
    async fn removal_marker_and_explicit_removal_are_soft_deletes() {
        let repository = InMemoryRecordRepository::new();
        let descriptor = catalog::helpdesk_ticket().unwrap_or_else(|_| unreachable!());
        let tenant_id = TenantId::new();
        let integration_id = IntegrationId::new();

        let deleted = repository
            .apply_candidate(
                tenant_id,
                integration_id,
                &descriptor,
                json!({"id": 5, "updated_at": "2024-05-01T00:00:00Z", "deleted": true}),
                Utc::now(),
            )
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(deleted.outcome, UpsertOutcome::Inserted);

        let record = repository
            .find_record(tenant_id, integration_id, "5")
            .await
            .unwrap_or_else(|_| unreachable!())
            .unwrap_or_else(|| unreachable!());
        assert!(record.removed_at.is_some());

        let removed = repository
            .mark_removed(tenant_id, integration_id, &["5".to_owned()], Utc::now())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn resightings_keep_an_earlier_soft_delete() {
        let repository = InMemoryRecordRepository::new();
        let descriptor = catalog::helpdesk_ticket().unwrap_or_else(|_| unreachable!());
        let tenant_id = TenantId::new();
        let integration_id = IntegrationId::new();
        let ticket = json!({"id": 6, "subject": "Printer jam", "updated_at": "2024-05-01T00:00:00Z"});

        repository
            .apply_candidate(tenant_id, integration_id, &descriptor, ticket.clone(), Utc::now())
            .await
            .unwrap_or_else(|_| unreachable!());
        let removed_at = Utc::now();
        repository
            .mark_removed(tenant_id, integration_id, &["6".to_owned()], removed_at)
            .await
            .unwrap_or_else(|_| unreachable!());

        let newer = json!({"id": 6, "subject": "Printer fixed", "updated_at": "2024-05-02T00:00:00Z"});
        for resight in [ticket, newer] {
            repository
                .apply_candidate(tenant_id, integration_id, &descriptor, resight, Utc::now())
                .await
                .unwrap_or_else(|_| unreachable!());

            let record = repository
                .find_record(tenant_id, integration_id, "6")
                .await
                .unwrap_or_else(|_| unreachable!())
                .unwrap_or_else(|| unreachable!());
            assert_eq!(record.removed_at, Some(removed_at));
        }

        let record = repository
            .find_record(tenant_id, integration_id, "6")
            .await
            .unwrap_or_else(|_| unreachable!())
            .unwrap_or_else(|| unreachable!());
        assert_eq!(record.payload["subject"], json!("Printer fixed"));
    }
}
