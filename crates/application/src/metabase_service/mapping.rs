use nada_core::{AppError, AppResult};
use nada_domain::{MetabaseMetadata, PermissionGroup};
use tracing::info;

use super::{MetabaseService, ignore_not_exist};

impl MetabaseService {
    pub(super) async fn add_dataset_mapping(&self, meta: MetabaseMetadata) -> AppResult<()> {
        let accesses = self
            .access_repository
            .list_active_access_to_dataset(meta.dataset_id)
            .await?;
        let all_users = accesses
            .iter()
            .any(|access| access.subject.is_group(self.config.all_users_group.as_str()));

        if all_users {
            self.add_all_users_dataset(meta).await
        } else {
            self.add_restricted_dataset_mapping(meta).await
        }
    }

    async fn add_all_users_dataset(&self, meta: MetabaseMetadata) -> AppResult<()> {
        let dataset_id = meta.dataset_id;

        if meta.database_id.is_none() {
            self.discard_partial_restricted_resources(&meta).await?;
            self.metabase_repository
                .set_permission_group(dataset_id, PermissionGroup::Shared)
                .await?;
            self.metabase_repository
                .set_service_account(dataset_id, self.config.service_account_email.as_str())
                .await?;

            let meta = self.metabase_repository.get(dataset_id).await?;
            let key = self.config.service_account_key.clone();
            return self.create(meta, key.as_str()).await;
        }

        if meta.is_soft_deleted() {
            self.restore(&meta).await?;
        }
        if meta.sync_completed.is_none() {
            self.complete_creation(&meta).await?;
        }

        if let (Some(database_id), Some(group_id)) =
            (meta.database_id, meta.permission_group.dedicated_id())
        {
            self.metabase_api
                .open_access_to_database(database_id)
                .await?;
            ignore_not_exist(self.metabase_api.delete_permission_group(group_id).await)?;
            if let Some(collection_id) = meta.collection_id.filter(|id| *id != 0) {
                ignore_not_exist(self.metabase_api.archive_collection(collection_id).await)?;
            }

            self.metabase_repository
                .set_permission_group(dataset_id, PermissionGroup::Shared)
                .await?;
            self.metabase_repository
                .set_collection(dataset_id, None)
                .await?;
            self.sync_table_visibility(dataset_id).await?;

            info!(%dataset_id, database_id, "metabase database opened to all users");
        }

        Ok(())
    }

    async fn add_restricted_dataset_mapping(&self, meta: MetabaseMetadata) -> AppResult<()> {
        let dataset_id = meta.dataset_id;

        if meta.database_id.is_none() {
            self.create_restricted(meta).await?;
        } else if meta.permission_group == PermissionGroup::Shared {
            return Err(AppError::InvalidRequest(format!(
                "dataset '{dataset_id}' is open to all users in metabase and cannot be restricted"
            )));
        } else {
            if meta.is_soft_deleted() {
                self.restore(&meta).await?;
            }
            if meta.sync_completed.is_none() {
                self.complete_creation(&meta).await?;
            }
        }

        self.grant_accesses_on_creation(dataset_id).await
    }

    /// Removes leftovers of an earlier restricted attempt before opening.
    async fn discard_partial_restricted_resources(&self, meta: &MetabaseMetadata) -> AppResult<()> {
        let dataset_id = meta.dataset_id;

        if let Some(group_id) = meta.permission_group.dedicated_id() {
            ignore_not_exist(self.metabase_api.delete_permission_group(group_id).await)?;
        }

        if let Some(collection_id) = meta.collection_id.filter(|id| *id != 0) {
            ignore_not_exist(self.metabase_api.archive_collection(collection_id).await)?;
            self.metabase_repository
                .set_collection(dataset_id, None)
                .await?;
        }

        if !meta.sa_email.is_empty() && !self.is_shared_service_account(meta.sa_email.as_str()) {
            ignore_not_exist(
                self.service_account_api
                    .delete_service_account_and_bindings(
                        self.config.gcp_project_id.as_str(),
                        meta.sa_email.as_str(),
                    )
                    .await,
            )?;
        }

        Ok(())
    }
}
