use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirrorline_application::{RecordRepository, UpsertResult};
use mirrorline_core::{AppError, AppResult, TenantId};
use mirrorline_domain::{
    EnrichmentRecord, IntegrationId, RecencyValue, Resolution, ResourceDescriptor, SyncedRecord,
    UpsertOutcome, plan_write,
};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

mod upsert;


/// PostgreSQL-backed repository for mirrored records and enrichments.
#[derive(Clone)]
pub struct PostgresRecordRepository {
    pool: PgPool,
}

impl PostgresRecordRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncedRecordRow {
    integration_id: Uuid,
    external_id: String,
    recency_value: Option<i64>,
    payload: Value,
    projections: Value,
    removed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct EnrichmentRow {
    integration_id: Uuid,
    parent_external_id: String,
    enrichment: String,
    child_key: String,
    payload: Value,
}

fn synced_record_from_row(row: SyncedRecordRow) -> SyncedRecord {
    let projections = match row.projections {
        Value::Object(projections) => projections,
        _ => Map::new(),
    };

    SyncedRecord {
        integration_id: IntegrationId::from_uuid(row.integration_id),
        external_id: row.external_id,
        recency: row.recency_value.map(RecencyValue::from_raw),
        payload: row.payload,
        projections,
        removed_at: row.removed_at,
        updated_at: row.updated_at,
    }
}

fn enrichment_from_row(row: EnrichmentRow) -> EnrichmentRecord {
    EnrichmentRecord {
        integration_id: IntegrationId::from_uuid(row.integration_id),
        parent_external_id: row.parent_external_id,
        enrichment: row.enrichment,
        child_key: row.child_key,
        payload: row.payload,
    }
}

#[async_trait]
impl RecordRepository for PostgresRecordRepository {
    async fn apply_candidate(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        descriptor: &ResourceDescriptor,
        candidate: Value,
        observed_at: DateTime<Utc>,
    ) -> AppResult<UpsertResult> {
        self.apply_candidate_impl(tenant_id, integration_id, descriptor, candidate, observed_at)
            .await
    }

    async fn mark_removed(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        external_ids: &[String],
        removed_at: DateTime<Utc>,
    ) -> AppResult<Vec<String>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_scalar::<_, String>(
            r#"
            UPDATE synced_records
            SET removed_at = $4, updated_at = now()
            WHERE tenant_id = $1
              AND integration_id = $2
              AND external_id = ANY($3)
              AND removed_at IS NULL
            RETURNING external_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .bind(external_ids)
        .bind(removed_at)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to mark records removed for integration '{integration_id}': {error}"
            ))
        })
    }

    async fn find_record(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        external_id: &str,
    ) -> AppResult<Option<SyncedRecord>> {
        let row = sqlx::query_as::<_, SyncedRecordRow>(
            r#"
            SELECT
                integration_id,
                external_id,
                recency_value,
                payload,
                projections,
                removed_at,
                updated_at
            FROM synced_records
            WHERE tenant_id = $1 AND integration_id = $2 AND external_id = $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to find record '{external_id}' for integration '{integration_id}': {error}"
            ))
        })?;

        Ok(row.map(synced_record_from_row))
    }

    async fn list_records(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Vec<SyncedRecord>> {
        let rows = sqlx::query_as::<_, SyncedRecordRow>(
            r#"
            SELECT
                integration_id,
                external_id,
                recency_value,
                payload,
                projections,
                removed_at,
                updated_at
            FROM synced_records
            WHERE tenant_id = $1 AND integration_id = $2
            ORDER BY external_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list records for integration '{integration_id}': {error}"
            ))
        })?;

        Ok(rows.into_iter().map(synced_record_from_row).collect())
    }

    async fn list_enrichments(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        parent_external_id: &str,
    ) -> AppResult<Vec<EnrichmentRecord>> {
        let rows = sqlx::query_as::<_, EnrichmentRow>(
            r#"
            SELECT
                integration_id,
                parent_external_id,
                enrichment,
                child_key,
                payload
            FROM synced_record_enrichments
            WHERE tenant_id = $1 AND integration_id = $2 AND parent_external_id = $3
            ORDER BY child_key, enrichment
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .bind(parent_external_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list enrichments of record '{parent_external_id}': {error}"
            ))
        })?;

        Ok(rows.into_iter().map(enrichment_from_row).collect())
    }

    async fn max_recency(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Option<RecencyValue>> {
        let max = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT MAX(recency_value)
            FROM synced_records
            WHERE tenant_id = $1 AND integration_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to read max recency for integration '{integration_id}': {error}"
            ))
        })?;

        Ok(max.map(RecencyValue::from_raw))
    }
}
