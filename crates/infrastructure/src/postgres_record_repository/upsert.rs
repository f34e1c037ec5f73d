use super::*;

impl PostgresRecordRepository {
    pub(super) async fn apply_candidate_impl(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        descriptor: &ResourceDescriptor,
        candidate: Value,
        observed_at: DateTime<Utc>,
    ) -> AppResult<UpsertResult> {
        let external_id = descriptor.external_id(&candidate)?;

        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin record upsert transaction: {error}"))
        })?;

        // Serializes writers per record, including the first insert of an id.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::TEXT || ':' || $2, 0))")
            .bind(integration_id.to_string())
            .bind(external_id.as_str())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to lock record '{external_id}' for integration '{integration_id}': {error}"
                ))
            })?;

        let existing = sqlx::query_as::<_, SyncedRecordRow>(
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
            WHERE integration_id = $1 AND external_id = $2
            FOR UPDATE
            "#,
        )
        .bind(integration_id.as_uuid())
        .bind(external_id.as_str())
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to read record '{external_id}' for integration '{integration_id}': {error}"
            ))
        })?
        .map(synced_record_from_row);

        let plan = plan_write(descriptor, existing.as_ref(), candidate, observed_at)?;
        let outcome = match plan.resolution {
            Resolution::Skip => UpsertOutcome::Skipped,
            Resolution::Insert => UpsertOutcome::Inserted,
            Resolution::Replace => UpsertOutcome::Replaced,
        };

        if !outcome.wrote() {
            transaction.rollback().await.map_err(|error| {
                AppError::Internal(format!(
                    "failed to release record upsert transaction: {error}"
                ))
            })?;
            return Ok(UpsertResult {
                external_id,
                outcome,
            });
        }

        let draft = plan.draft;
        // Soft deletes stick: only an explicit removal sets the marker.
        let removed_at = existing
            .as_ref()
            .and_then(|record| record.removed_at)
            .or_else(|| draft.removed.then_some(observed_at));

        sqlx::query(
            r#"
            INSERT INTO synced_records (
                tenant_id,
                integration_id,
                external_id,
                recency_value,
                payload,
                projections,
                removed_at,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT (integration_id, external_id)
            DO UPDATE SET
                recency_value = EXCLUDED.recency_value,
                payload = EXCLUDED.payload,
                projections = EXCLUDED.projections,
                removed_at = EXCLUDED.removed_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(integration_id.as_uuid())
        .bind(external_id.as_str())
        .bind(draft.recency.map(RecencyValue::raw))
        .bind(&draft.payload)
        .bind(Value::Object(draft.projections))
        .bind(removed_at)
        .bind(observed_at)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to write record '{external_id}' for integration '{integration_id}': {error}"
            ))
        })?;

        sqlx::query(
            r#"
            DELETE FROM synced_record_enrichments
            WHERE integration_id = $1 AND parent_external_id = $2
            "#,
        )
        .bind(integration_id.as_uuid())
        .bind(external_id.as_str())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to clear enrichments of record '{external_id}': {error}"
            ))
        })?;

        for enrichment in &draft.enrichments {
            sqlx::query(
                r#"
                INSERT INTO synced_record_enrichments (
                    tenant_id,
                    integration_id,
                    parent_external_id,
                    enrichment,
                    child_key,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (integration_id, parent_external_id, enrichment, child_key)
                DO UPDATE SET payload = EXCLUDED.payload
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(integration_id.as_uuid())
            .bind(external_id.as_str())
            .bind(enrichment.enrichment.as_str())
            .bind(enrichment.child_key.as_str())
            .bind(&enrichment.payload)
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to write enrichment '{}' of record '{external_id}': {error}",
                    enrichment.child_key
                ))
            })?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit record upsert transaction: {error}"))
        })?;

        Ok(UpsertResult {
            external_id,
            outcome,
        })
    }
}
