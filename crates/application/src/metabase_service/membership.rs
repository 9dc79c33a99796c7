use nada_core::{AppResult, ResultExt};
use nada_domain::{DatasetId, Subject, SubjectType};
use tracing::{debug, info};

use super::MetabaseService;

impl MetabaseService {
    /// Adds a user subject to the dataset's permission group.
    ///
    /// Dropped when the dataset is not mapped yet; the next mapping grants
    /// every active access anyway.
    pub async fn grant_metabase_access(
        &self,
        dataset_id: DatasetId,
        subject: &Subject,
    ) -> AppResult<()> {
        const OP: &str = "metabase_service.grant_metabase_access";

        let meta = match self.metabase_repository.get(dataset_id).await {
            Ok(meta) => meta,
            Err(error) if error.is_not_exist() => return Ok(()),
            Err(error) => return Err(error.with_op(OP)),
        };

        if meta.sync_completed.is_none() {
            debug!(%dataset_id, %subject, "metabase sync not completed; grant dropped");
            return Ok(());
        }

        if subject.subject_type() != SubjectType::User {
            return Ok(());
        }

        if let Some(group_id) = meta.permission_group.dedicated_id() {
            self.add_group_member_if_missing(group_id, subject.identifier())
                .await
                .op(OP)?;
        }

        Ok(())
    }

    /// Removes a subject from Metabase.
    ///
    /// Revoking the all-users group soft-deletes an open dataset.
    pub async fn revoke_metabase_access(
        &self,
        dataset_id: DatasetId,
        subject: &Subject,
    ) -> AppResult<()> {
        const OP: &str = "metabase_service.revoke_metabase_access";

        let meta = match self.metabase_repository.get(dataset_id).await {
            Ok(meta) => meta,
            Err(error) if error.is_not_exist() => return Ok(()),
            Err(error) => return Err(error.with_op(OP)),
        };

        if subject.is_group(self.config.all_users_group.as_str()) {
            return self.soft_delete_database(dataset_id).await.op(OP);
        }

        if subject.subject_type() != SubjectType::User {
            return Ok(());
        }

        let Some(group_id) = meta.permission_group.dedicated_id() else {
            return Ok(());
        };

        let members = self
            .metabase_api
            .get_permission_group(group_id)
            .await
            .op(OP)?;
        for member in members
            .iter()
            .filter(|member| member.email.eq_ignore_ascii_case(subject.identifier()))
        {
            self.metabase_api
                .remove_permission_group_member(member.membership_id)
                .await
                .op(OP)?;
            info!(
                %dataset_id,
                group_id,
                email = subject.identifier(),
                "metabase group member removed"
            );
        }

        Ok(())
    }

    /// Mirrors every active user access into the dedicated group.
    pub(super) async fn grant_accesses_on_creation(&self, dataset_id: DatasetId) -> AppResult<()> {
        let meta = self.metabase_repository.get(dataset_id).await?;
        let Some(group_id) = meta.permission_group.dedicated_id() else {
            return Ok(());
        };

        let accesses = self
            .access_repository
            .list_active_access_to_dataset(dataset_id)
            .await?;
        for access in accesses
            .iter()
            .filter(|access| access.subject.subject_type() == SubjectType::User)
        {
            self.add_group_member_if_missing(group_id, access.subject.identifier())
                .await?;
        }

        Ok(())
    }

    async fn add_group_member_if_missing(&self, group_id: i64, email: &str) -> AppResult<()> {
        let members = self.metabase_api.get_permission_group(group_id).await?;
        if members
            .iter()
            .any(|member| member.email.eq_ignore_ascii_case(email))
        {
            return Ok(());
        }

        self.metabase_api
            .add_permission_group_member(group_id, email)
            .await?;
        info!(group_id, email, "metabase group member added");
        Ok(())
    }
}
