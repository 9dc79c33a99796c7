//! PostgreSQL reads of the dataset catalog, joinable views and purpose
//! documentation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nada_application::{DatasetRepository, JoinableViewRepository, PollyRepository};
use nada_core::{AppError, AppResult};
use nada_domain::{
    BigQuery, Dataproduct, DataproductId, Dataset, DatasetId, JoinableView, Owner, Polly,
    PollyInput,
};


/// PostgreSQL implementation of the catalog read ports.
#[derive(Clone)]
pub struct PostgresDatasetRepository {
    pool: PgPool,
}

impl PostgresDatasetRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DatasetRow {
    id: Uuid,
    dataproduct_id: Uuid,
    name: String,
    description: Option<String>,
    pii: String,
}

impl TryFrom<DatasetRow> for Dataset {
    type Error = AppError;

    fn try_from(row: DatasetRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: DatasetId::from_uuid(row.id),
            dataproduct_id: DataproductId::from_uuid(row.dataproduct_id),
            name: row.name,
            description: row.description,
            pii: row.pii.parse()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DataproductRow {
    id: Uuid,
    name: String,
    group_email: String,
    team_contact: Option<String>,
    team_id: Option<String>,
}

impl From<DataproductRow> for Dataproduct {
    fn from(row: DataproductRow) -> Self {
        Self {
            id: DataproductId::from_uuid(row.id),
            name: row.name,
            owner: Owner {
                group: row.group_email,
                team_contact: row.team_contact,
                team_id: row.team_id,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BigQueryRow {
    id: Uuid,
    dataset_id: Uuid,
    project_id: String,
    dataset: String,
    table_name: String,
    table_type: String,
    pseudo_columns: Vec<String>,
    missing_since: Option<DateTime<Utc>>,
}

impl From<BigQueryRow> for BigQuery {
    fn from(row: BigQueryRow) -> Self {
        Self {
            id: row.id,
            dataset_id: DatasetId::from_uuid(row.dataset_id),
            project_id: row.project_id,
            dataset: row.dataset,
            table: row.table_name,
            table_type: row.table_type,
            pseudo_columns: row.pseudo_columns,
            missing_since: row.missing_since,
        }
    }
}

#[async_trait]
impl DatasetRepository for PostgresDatasetRepository {
    async fn get_dataset(&self, dataset_id: DatasetId) -> AppResult<Dataset> {
        let row = sqlx::query_as::<_, DatasetRow>(
            r#"
            SELECT id, dataproduct_id, name, description, pii
            FROM datasets
            WHERE id = $1
            "#,
        )
        .bind(dataset_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Database(format!("failed to get dataset: {error}")))?
        .ok_or_else(|| AppError::NotExist(format!("dataset '{dataset_id}'")))?;

        Dataset::try_from(row)
    }

    async fn get_dataproduct(&self, dataset: &Dataset) -> AppResult<Dataproduct> {
        sqlx::query_as::<_, DataproductRow>(
            r#"
            SELECT id, name, group_email, team_contact, team_id
            FROM dataproducts
            WHERE id = $1
            "#,
        )
        .bind(dataset.dataproduct_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Database(format!("failed to get dataproduct: {error}")))?
        .map(Dataproduct::from)
        .ok_or_else(|| AppError::NotExist(format!("dataproduct '{}'", dataset.dataproduct_id)))
    }

    async fn get_bigquery_datasource(&self, dataset_id: DatasetId) -> AppResult<BigQuery> {
        sqlx::query_as::<_, BigQueryRow>(
            r#"
            SELECT
                id, dataset_id, project_id, dataset, table_name, table_type,
                pseudo_columns, missing_since
            FROM datasource_bigquery
            WHERE dataset_id = $1
            "#,
        )
        .bind(dataset_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to get bigquery datasource: {error}"))
        })?
        .map(BigQuery::from)
        .ok_or_else(|| AppError::NotExist(format!("bigquery datasource of dataset '{dataset_id}'")))
    }
}

#[async_trait]
impl JoinableViewRepository for PostgresDatasetRepository {
    async fn list_joinable_views_for_reference_and_user(
        &self,
        owner: &str,
        dataset_id: DatasetId,
    ) -> AppResult<Vec<JoinableView>> {
        let rows = sqlx::query_as::<_, (Uuid, String, String)>(
            r#"
            SELECT DISTINCT jv.id, jv.name, jv.bigquery_dataset
            FROM joinable_views jv
            JOIN joinable_views_datasource jvd ON jvd.joinable_view_id = jv.id
            JOIN datasource_bigquery bq ON bq.id = jvd.datasource_id
            WHERE bq.dataset_id = $1
              AND LOWER(jv.owner) = LOWER($2)
              AND jv.deleted IS NULL
              AND jvd.deleted IS NULL
            ORDER BY jv.name
            "#,
        )
        .bind(dataset_id.as_uuid())
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Database(format!("failed to list joinable views: {error}")))?;

        Ok(rows
            .into_iter()
            .map(|(id, name, bigquery_dataset)| JoinableView {
                id,
                name,
                bigquery_dataset,
            })
            .collect())
    }
}

#[async_trait]
impl PollyRepository for PostgresDatasetRepository {
    async fn create_polly_documentation(&self, input: PollyInput) -> AppResult<Polly> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO polly_documentation (external_id, name, url)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(input.external_id.as_str())
        .bind(input.name.as_str())
        .bind(input.url.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to create polly documentation: {error}"))
        })?;

        Ok(Polly {
            id,
            external_id: input.external_id,
            name: input.name,
            url: input.url,
        })
    }
}
