use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use nada_domain::DatasetId;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Connects to `DATABASE_URL` and migrates it; `None` skips the test.
pub(crate) async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres tests: {error}");
    }

    Some(pool)
}

/// Catalog rows inserted for one test dataset.
pub(crate) struct SeededDataset {
    pub(crate) dataset_id: DatasetId,
    pub(crate) datasource_id: Uuid,
    pub(crate) project_id: String,
    pub(crate) dataset: String,
}

/// Inserts a dataproduct, a dataset and its BigQuery datasource.
///
/// The BigQuery dataset name is unique per call so tests sharing a database
/// do not see each other's tables.
pub(crate) async fn seed_dataset(pool: &PgPool, pii: &str, table: &str) -> SeededDataset {
    let dataproduct_id = sqlx::query_scalar::<_, Uuid>(
        r#"
            INSERT INTO dataproducts (name, group_email, team_contact, team_id)
            VALUES ('Sykefravær', 'team-sykefravaer@nav.no', '#team-sykefravaer', 'team-id')
            RETURNING id
            "#,
    )
    .fetch_one(pool)
    .await
    .unwrap_or_else(|error| panic!("{error}"));

    let dataset_id = sqlx::query_scalar::<_, Uuid>(
        r#"
            INSERT INTO datasets (dataproduct_id, name, description, pii)
            VALUES ($1, 'Fravær per måned', 'Aggregert fravær', $2)
            RETURNING id
            "#,
    )
    .bind(dataproduct_id)
    .bind(pii)
    .fetch_one(pool)
    .await
    .unwrap_or_else(|error| panic!("{error}"));

    let project_id = "team-sykefravaer-prod".to_owned();
    let dataset = format!("fravaer_{}", Uuid::new_v4().simple());
    let datasource_id = sqlx::query_scalar::<_, Uuid>(
        r#"
            INSERT INTO datasource_bigquery (dataset_id, project_id, dataset, table_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
    )
    .bind(dataset_id)
    .bind(project_id.as_str())
    .bind(dataset.as_str())
    .bind(table)
    .fetch_one(pool)
    .await
    .unwrap_or_else(|error| panic!("{error}"));

    SeededDataset {
        dataset_id: DatasetId::from_uuid(dataset_id),
        datasource_id,
        project_id,
        dataset,
    }
}
