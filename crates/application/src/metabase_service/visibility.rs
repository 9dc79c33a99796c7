use std::collections::HashSet;

use nada_core::{AppError, AppResult, ResultExt};
use nada_domain::DatasetId;
use tracing::{info, warn};

use super::MetabaseService;

impl MetabaseService {
    /// Shows exactly the tables that are catalog-exposed in the dataset's
    /// Metabase database and hides the rest.
    ///
    /// Restricted databases expose only their own table. Open databases also
    /// expose every other open mapped table of the same BigQuery dataset.
    pub async fn sync_table_visibility(&self, dataset_id: DatasetId) -> AppResult<()> {
        const OP: &str = "metabase_service.sync_table_visibility";

        let meta = self.metabase_repository.get(dataset_id).await.op(OP)?;
        let database_id = meta.database_id.ok_or_else(|| {
            AppError::NotExist(format!("dataset '{dataset_id}' has no metabase database"))
                .with_op(OP)
        })?;
        let bigquery = self
            .dataset_repository
            .get_bigquery_datasource(dataset_id)
            .await
            .op(OP)?;

        let mut visible: HashSet<String> = HashSet::from([bigquery.table.clone()]);
        if !meta.is_restricted() {
            visible.extend(
                self.metabase_repository
                    .list_open_tables_in_bigquery_dataset(
                        bigquery.project_id.as_str(),
                        bigquery.dataset.as_str(),
                    )
                    .await
                    .op(OP)?,
            );
        }

        let (shown, hidden): (Vec<_>, Vec<_>) = self
            .metabase_api
            .tables(database_id)
            .await
            .op(OP)?
            .into_iter()
            .partition(|table| visible.contains(&table.name));
        let shown: Vec<i64> = shown.into_iter().map(|table| table.id).collect();
        let hidden: Vec<i64> = hidden.into_iter().map(|table| table.id).collect();

        if !hidden.is_empty() {
            self.metabase_api.hide_tables(&hidden).await.op(OP)?;
        }
        if !shown.is_empty() {
            self.metabase_api.show_tables(&shown).await.op(OP)?;
        }

        Ok(())
    }

    /// Re-syncs visibility of every mapped dataset, continuing past failures.
    pub async fn sync_all_tables_visibility(&self) -> AppResult<()> {
        const OP: &str = "metabase_service.sync_all_tables_visibility";

        let mapped = self
            .metabase_repository
            .list_sync_completed()
            .await
            .op(OP)?;
        let mut failed = 0_usize;
        for meta in &mapped {
            if let Err(error) = self.sync_table_visibility(meta.dataset_id).await {
                failed += 1;
                warn!(
                    dataset_id = %meta.dataset_id,
                    error = %error,
                    "table visibility sync failed"
                );
            }
        }

        info!(datasets = mapped.len(), failed, "metabase table visibility synced");
        Ok(())
    }
}
