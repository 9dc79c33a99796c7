use nada_core::{AppResult, ResultExt};
use nada_domain::{DatasetId, MetabaseMetadata};
use tracing::info;

use super::{MetabaseService, ignore_not_exist};

impl MetabaseService {
    /// Removes every Metabase resource of a dataset and its checkpoint.
    ///
    /// Each step treats `NotExist` as done, so an interrupted teardown can be
    /// repeated.
    pub async fn delete_database(&self, dataset_id: DatasetId) -> AppResult<()> {
        const OP: &str = "metabase_service.delete_database";

        let meta = match self.metabase_repository.get(dataset_id).await {
            Ok(meta) => meta,
            Err(error) if error.is_not_exist() => return Ok(()),
            Err(error) => return Err(error.with_op(OP)),
        };

        if !meta.is_soft_deleted() && !meta.sa_email.is_empty() {
            self.revoke_service_account_grant(&meta).await.op(OP)?;
        }

        if let Some(group_id) = meta.permission_group.dedicated_id() {
            ignore_not_exist(self.metabase_api.delete_permission_group(group_id).await).op(OP)?;
        }

        if let Some(collection_id) = meta.collection_id.filter(|id| *id != 0) {
            ignore_not_exist(self.metabase_api.archive_collection(collection_id).await).op(OP)?;
        }

        if let Some(database_id) = meta.database_id {
            ignore_not_exist(self.metabase_api.delete_database(database_id).await).op(OP)?;
        }

        if !meta.sa_email.is_empty() && !self.is_shared_service_account(meta.sa_email.as_str()) {
            ignore_not_exist(
                self.service_account_api
                    .delete_service_account_and_bindings(
                        self.config.gcp_project_id.as_str(),
                        meta.sa_email.as_str(),
                    )
                    .await,
            )
            .op(OP)?;
        }

        ignore_not_exist(self.metabase_repository.delete(dataset_id).await).op(OP)?;

        info!(
            %dataset_id,
            restricted = meta.is_restricted(),
            "metabase mapping removed"
        );
        Ok(())
    }

    /// Withdraws the BigQuery grant of an open dataset but keeps its database.
    pub async fn soft_delete_database(&self, dataset_id: DatasetId) -> AppResult<()> {
        const OP: &str = "metabase_service.soft_delete_database";

        let meta = self.metabase_repository.get(dataset_id).await.op(OP)?;
        if meta.is_soft_deleted() || meta.is_restricted() {
            return Ok(());
        }

        if !meta.sa_email.is_empty() {
            self.revoke_service_account_grant(&meta).await.op(OP)?;
        }
        self.metabase_repository
            .soft_delete(dataset_id)
            .await
            .op(OP)?;

        info!(%dataset_id, "metabase mapping soft-deleted");
        Ok(())
    }

    /// Re-grants the stored service account and clears `deleted_at`.
    pub(super) async fn restore(&self, meta: &MetabaseMetadata) -> AppResult<()> {
        let bigquery = self
            .dataset_repository
            .get_bigquery_datasource(meta.dataset_id)
            .await?;

        self.bigquery_api
            .grant(
                bigquery.project_id.as_str(),
                bigquery.dataset.as_str(),
                bigquery.table.as_str(),
                format!("serviceAccount:{}", meta.sa_email).as_str(),
            )
            .await?;
        self.metabase_repository.restore(meta.dataset_id).await?;

        info!(dataset_id = %meta.dataset_id, "metabase mapping restored");
        Ok(())
    }

    async fn revoke_service_account_grant(&self, meta: &MetabaseMetadata) -> AppResult<()> {
        let bigquery = match self
            .dataset_repository
            .get_bigquery_datasource(meta.dataset_id)
            .await
        {
            Ok(bigquery) => bigquery,
            Err(error) if error.is_not_exist() => return Ok(()),
            Err(error) => return Err(error),
        };

        ignore_not_exist(
            self.bigquery_api
                .revoke(
                    bigquery.project_id.as_str(),
                    bigquery.dataset.as_str(),
                    bigquery.table.as_str(),
                    format!("serviceAccount:{}", meta.sa_email).as_str(),
                )
                .await,
        )
    }
}
