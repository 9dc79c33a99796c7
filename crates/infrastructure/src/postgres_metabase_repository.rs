//! PostgreSQL-backed Metabase checkpoint and third-party mapping ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nada_application::{MetabaseRepository, ThirdPartyMappingRepository};
use nada_core::{AppError, AppResult};
use nada_domain::{DatasetId, MetabaseMetadata, PermissionGroup, ThirdPartyMapping};

mod mappings;


/// PostgreSQL implementation of the Metabase storage ports.
#[derive(Clone)]
pub struct PostgresMetabaseRepository {
    pool: PgPool,
}

impl PostgresMetabaseRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MetabaseMetadataRow {
    dataset_id: Uuid,
    database_id: Option<i64>,
    permission_group_id: Option<i64>,
    collection_id: Option<i64>,
    sa_email: String,
    deleted_at: Option<DateTime<Utc>>,
    sync_completed: Option<DateTime<Utc>>,
}

impl From<MetabaseMetadataRow> for MetabaseMetadata {
    fn from(row: MetabaseMetadataRow) -> Self {
        Self {
            dataset_id: DatasetId::from_uuid(row.dataset_id),
            database_id: row.database_id,
            permission_group: PermissionGroup::from_stored(row.permission_group_id),
            collection_id: row.collection_id,
            sa_email: row.sa_email,
            deleted_at: row.deleted_at,
            sync_completed: row.sync_completed,
        }
    }
}

const METADATA_COLUMNS: &str = r#"
    dataset_id, database_id, permission_group_id, collection_id, sa_email, deleted_at,
    sync_completed
"#;

#[async_trait]
impl MetabaseRepository for PostgresMetabaseRepository {
    async fn create(&self, meta: &MetabaseMetadata) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO metabase_metadata (
                dataset_id, database_id, permission_group_id, collection_id, sa_email
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (dataset_id) DO NOTHING
            "#,
        )
        .bind(meta.dataset_id.as_uuid())
        .bind(meta.database_id)
        .bind(meta.permission_group.to_stored())
        .bind(meta.collection_id)
        .bind(meta.sa_email.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to create metabase metadata: {error}"))
        })?;

        Ok(())
    }

    async fn get(&self, dataset_id: DatasetId) -> AppResult<MetabaseMetadata> {
        sqlx::query_as::<_, MetabaseMetadataRow>(
            format!("SELECT {METADATA_COLUMNS} FROM metabase_metadata WHERE dataset_id = $1")
                .as_str(),
        )
        .bind(dataset_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Database(format!("failed to get metabase metadata: {error}")))?
        .map(MetabaseMetadata::from)
        .ok_or_else(|| {
            AppError::NotExist(format!("metabase metadata for dataset '{dataset_id}'"))
        })
    }

    async fn set_database(&self, dataset_id: DatasetId, database_id: i64) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE metabase_metadata SET database_id = $2 WHERE dataset_id = $1",
        )
        .bind(dataset_id.as_uuid())
        .bind(database_id)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Database(format!("failed to set metabase database: {error}")))?;

        ensure_row_touched(result, dataset_id)
    }

    async fn set_permission_group(
        &self,
        dataset_id: DatasetId,
        permission_group: PermissionGroup,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE metabase_metadata SET permission_group_id = $2 WHERE dataset_id = $1",
        )
        .bind(dataset_id.as_uuid())
        .bind(permission_group.to_stored())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to set metabase permission group: {error}"))
        })?;

        ensure_row_touched(result, dataset_id)
    }

    async fn set_collection(
        &self,
        dataset_id: DatasetId,
        collection_id: Option<i64>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE metabase_metadata SET collection_id = $2 WHERE dataset_id = $1",
        )
        .bind(dataset_id.as_uuid())
        .bind(collection_id)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to set metabase collection: {error}"))
        })?;

        ensure_row_touched(result, dataset_id)
    }

    async fn set_service_account(&self, dataset_id: DatasetId, sa_email: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE metabase_metadata SET sa_email = $2 WHERE dataset_id = $1")
            .bind(dataset_id.as_uuid())
            .bind(sa_email)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Database(format!("failed to set metabase service account: {error}"))
            })?;

        ensure_row_touched(result, dataset_id)
    }

    async fn set_sync_completed(&self, dataset_id: DatasetId) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE metabase_metadata SET sync_completed = now() WHERE dataset_id = $1",
        )
        .bind(dataset_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to set metabase sync completed: {error}"))
        })?;

        ensure_row_touched(result, dataset_id)
    }

    async fn soft_delete(&self, dataset_id: DatasetId) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE metabase_metadata SET deleted_at = now() WHERE dataset_id = $1",
        )
        .bind(dataset_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to soft-delete metabase metadata: {error}"))
        })?;

        ensure_row_touched(result, dataset_id)
    }

    async fn restore(&self, dataset_id: DatasetId) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE metabase_metadata SET deleted_at = NULL WHERE dataset_id = $1",
        )
        .bind(dataset_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to restore metabase metadata: {error}"))
        })?;

        ensure_row_touched(result, dataset_id)
    }

    async fn delete(&self, dataset_id: DatasetId) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM metabase_metadata WHERE dataset_id = $1")
            .bind(dataset_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Database(format!("failed to delete metabase metadata: {error}"))
            })?;

        ensure_row_touched(result, dataset_id)
    }

    async fn list_sync_completed(&self) -> AppResult<Vec<MetabaseMetadata>> {
        let rows = sqlx::query_as::<_, MetabaseMetadataRow>(
            format!(
                r#"
                SELECT {METADATA_COLUMNS}
                FROM metabase_metadata
                WHERE sync_completed IS NOT NULL AND deleted_at IS NULL
                "#
            )
            .as_str(),
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to list synced metabase metadata: {error}"))
        })?;

        Ok(rows.into_iter().map(MetabaseMetadata::from).collect())
    }

    async fn list_open_tables_in_bigquery_dataset(
        &self,
        project_id: &str,
        dataset: &str,
    ) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT bq.table_name
            FROM metabase_metadata mm
            JOIN datasource_bigquery bq ON bq.dataset_id = mm.dataset_id
            WHERE bq.project_id = $1
              AND bq.dataset = $2
              AND mm.sync_completed IS NOT NULL
              AND mm.deleted_at IS NULL
              AND COALESCE(mm.collection_id, 0) = 0
            "#,
        )
        .bind(project_id)
        .bind(dataset)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Database(format!("failed to list open tables: {error}")))
    }
}

fn ensure_row_touched(
    result: sqlx::postgres::PgQueryResult,
    dataset_id: DatasetId,
) -> AppResult<()> {
    if result.rows_affected() == 0 {
        return Err(AppError::NotExist(format!(
            "metabase metadata for dataset '{dataset_id}'"
        )));
    }

    Ok(())
}
