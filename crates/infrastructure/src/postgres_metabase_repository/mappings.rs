use super::*;

#[derive(Debug, sqlx::FromRow)]
struct ThirdPartyMappingRow {
    dataset_id: Uuid,
    services: Vec<String>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<ThirdPartyMappingRow> for ThirdPartyMapping {
    fn from(row: ThirdPartyMappingRow) -> Self {
        Self {
            dataset_id: DatasetId::from_uuid(row.dataset_id),
            services: row.services,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
        }
    }
}

#[async_trait]
impl ThirdPartyMappingRepository for PostgresMetabaseRepository {
    async fn get(&self, dataset_id: DatasetId) -> AppResult<ThirdPartyMapping> {
        sqlx::query_as::<_, ThirdPartyMappingRow>(
            r#"
            SELECT dataset_id, services, updated_at, processed_at
            FROM third_party_mappings
            WHERE dataset_id = $1
            "#,
        )
        .bind(dataset_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to get third-party mapping: {error}"))
        })?
        .map(ThirdPartyMapping::from)
        .ok_or_else(|| AppError::NotExist(format!("third-party mapping of dataset '{dataset_id}'")))
    }

    async fn upsert(
        &self,
        dataset_id: DatasetId,
        services: &[String],
    ) -> AppResult<ThirdPartyMapping> {
        // updated_at must move forward even when two upserts share a clock tick.
        let row = sqlx::query_as::<_, ThirdPartyMappingRow>(
            r#"
            INSERT INTO third_party_mappings (dataset_id, services, updated_at)
            VALUES ($1, $2, clock_timestamp())
            ON CONFLICT (dataset_id) DO UPDATE
            SET services = EXCLUDED.services,
                updated_at = GREATEST(
                    clock_timestamp(),
                    third_party_mappings.updated_at + INTERVAL '1 microsecond'
                )
            RETURNING dataset_id, services, updated_at, processed_at
            "#,
        )
        .bind(dataset_id.as_uuid())
        .bind(services)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to upsert third-party mapping: {error}"))
        })?;

        Ok(ThirdPartyMapping::from(row))
    }

    async fn list_unprocessed(&self) -> AppResult<Vec<ThirdPartyMapping>> {
        let rows = sqlx::query_as::<_, ThirdPartyMappingRow>(
            r#"
            SELECT dataset_id, services, updated_at, processed_at
            FROM third_party_mappings
            WHERE processed_at IS NULL OR processed_at < updated_at
            ORDER BY updated_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to list unprocessed mappings: {error}"))
        })?;

        Ok(rows.into_iter().map(ThirdPartyMapping::from).collect())
    }

    async fn mark_processed(&self, dataset_id: DatasetId, version: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE third_party_mappings
            SET processed_at = $2
            WHERE dataset_id = $1 AND updated_at = $2
            "#,
        )
        .bind(dataset_id.as_uuid())
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to mark mapping processed: {error}"))
        })?;

        Ok(())
    }

    async fn mark_pending(&self, dataset_id: DatasetId) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE third_party_mappings SET processed_at = NULL WHERE dataset_id = $1",
        )
        .bind(dataset_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Database(format!("failed to mark mapping pending: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotExist(format!(
                "third-party mapping of dataset '{dataset_id}'"
            )));
        }

        Ok(())
    }
}
