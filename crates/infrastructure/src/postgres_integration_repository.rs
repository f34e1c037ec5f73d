use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirrorline_application::IntegrationRepository;
use mirrorline_core::{AppError, AppResult, TenantId};
use mirrorline_domain::{
    Integration, IntegrationId, IntegrationParts, OpaqueId, RecencyValue, ResourceType,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::AesCredentialCipher;


/// PostgreSQL-backed integration repository with encrypted credentials.
#[derive(Clone)]
pub struct PostgresIntegrationRepository {
    pool: PgPool,
    cipher: AesCredentialCipher,
}

impl PostgresIntegrationRepository {
    /// Creates a repository with the provided connection pool and credential cipher.
    #[must_use]
    pub fn new(pool: PgPool, cipher: AesCredentialCipher) -> Self {
        Self { pool, cipher }
    }

    fn integration_from_row(&self, row: IntegrationRow) -> AppResult<Integration> {
        Ok(Integration::from_parts(IntegrationParts {
            id: IntegrationId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            resource_type: ResourceType::new(row.resource_type)?,
            opaque_id: OpaqueId::new(row.opaque_id)?,
            credentials: self.cipher.open(&row.credentials_ciphertext)?,
            depends_on: row.depends_on.map(IntegrationId::from_uuid),
            last_backfilled_cursor: row.last_backfilled_cursor.map(RecencyValue::from_raw),
            last_backfilled_at: row.last_backfilled_at,
        }))
    }

    fn integrations_from_rows(&self, rows: Vec<IntegrationRow>) -> AppResult<Vec<Integration>> {
        rows.into_iter()
            .map(|row| self.integration_from_row(row))
            .collect()
    }
}

#[derive(Debug, FromRow)]
struct IntegrationRow {
    id: Uuid,
    tenant_id: Uuid,
    opaque_id: String,
    resource_type: String,
    credentials_ciphertext: Vec<u8>,
    depends_on: Option<Uuid>,
    last_backfilled_cursor: Option<i64>,
    last_backfilled_at: Option<DateTime<Utc>>,
}

const SELECT_INTEGRATION: &str = r#"
    SELECT
        id,
        tenant_id,
        opaque_id,
        resource_type,
        credentials_ciphertext,
        depends_on,
        last_backfilled_cursor,
        last_backfilled_at
    FROM integrations
"#;

#[async_trait]
impl IntegrationRepository for PostgresIntegrationRepository {
    async fn save_integration(&self, integration: &Integration) -> AppResult<()> {
        let sealed = self.cipher.seal(integration.credentials())?;

        sqlx::query(
            r#"
            INSERT INTO integrations (
                id,
                tenant_id,
                opaque_id,
                resource_type,
                credentials_ciphertext,
                depends_on,
                last_backfilled_cursor,
                last_backfilled_at,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now())
            ON CONFLICT (id)
            DO UPDATE SET
                credentials_ciphertext = EXCLUDED.credentials_ciphertext,
                depends_on = EXCLUDED.depends_on,
                last_backfilled_cursor = EXCLUDED.last_backfilled_cursor,
                last_backfilled_at = EXCLUDED.last_backfilled_at,
                updated_at = now()
            WHERE integrations.tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(integration.id().as_uuid())
        .bind(integration.tenant_id().as_uuid())
        .bind(integration.opaque_id().as_str())
        .bind(integration.resource_type().as_str())
        .bind(sealed)
        .bind(integration.depends_on().map(|parent| parent.as_uuid()))
        .bind(integration.last_backfilled_cursor().map(RecencyValue::raw))
        .bind(integration.last_backfilled_at())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to save integration '{}' for tenant '{}': {error}",
                integration.id(),
                integration.tenant_id()
            ))
        })?;

        Ok(())
    }

    async fn find_integration(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Option<Integration>> {
        let row = sqlx::query_as::<_, IntegrationRow>(&format!(
            "{SELECT_INTEGRATION} WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to find integration '{integration_id}' for tenant '{tenant_id}': {error}"
            ))
        })?;

        row.map(|row| self.integration_from_row(row)).transpose()
    }

    async fn find_by_opaque_id(&self, opaque_id: &OpaqueId) -> AppResult<Option<Integration>> {
        let row = sqlx::query_as::<_, IntegrationRow>(&format!(
            "{SELECT_INTEGRATION} WHERE opaque_id = $1"
        ))
        .bind(opaque_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to find integration by opaque id '{opaque_id}': {error}"
            ))
        })?;

        row.map(|row| self.integration_from_row(row)).transpose()
    }

    async fn list_dependents(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<Vec<Integration>> {
        let rows = sqlx::query_as::<_, IntegrationRow>(&format!(
            "{SELECT_INTEGRATION} WHERE tenant_id = $1 AND depends_on = $2 ORDER BY created_at, id"
        ))
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list dependents of integration '{integration_id}' for tenant '{tenant_id}': {error}"
            ))
        })?;

        self.integrations_from_rows(rows)
    }

    async fn delete_integration(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM integrations
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to delete integration '{integration_id}' for tenant '{tenant_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "integration '{integration_id}' for tenant '{tenant_id}'"
            )));
        }

        Ok(())
    }

    async fn record_backfill_success(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        watermark: Option<RecencyValue>,
        finished_at: DateTime<Utc>,
    ) -> AppResult<()> {
        // GREATEST ignores NULL, so an empty run keeps the stored watermark.
        let result = sqlx::query(
            r#"
            UPDATE integrations
            SET
                last_backfilled_cursor = GREATEST(last_backfilled_cursor, $3),
                last_backfilled_at = $4,
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .bind(watermark.map(RecencyValue::raw))
        .bind(finished_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record backfill success for integration '{integration_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "integration '{integration_id}' for tenant '{tenant_id}'"
            )));
        }

        Ok(())
    }
}
