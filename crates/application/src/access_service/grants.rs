use nada_core::{AppResult, ResultExt, User};
use nada_domain::{Access, AccessId, BigQuery, DatasetId, Subject};
use tracing::{error, info};

use super::{
    AccessService, GrantAccessInput, ensure_future_expiry, log_partial_views, resolve_subject,
};
use crate::access_ports::GrantAccessRecord;
use crate::authorization::ensure_user_in_group;

impl AccessService {
    /// Grants access directly, renewing any active access of the subject.
    ///
    /// Joinable views over pseudonymised datasets are granted before the base
    /// table.
    pub async fn grant_access_to_dataset(
        &self,
        user: &User,
        input: GrantAccessInput,
        gcp_project_id: &str,
    ) -> AppResult<Access> {
        const OP: &str = "access_service.grant_access_to_dataset";

        ensure_future_expiry(input.expires).op(OP)?;
        let subject = resolve_subject(user, input.subject.as_deref(), input.subject_type).op(OP)?;

        let (dataset, dataproduct) = self.owning_dataproduct(input.dataset_id).await.op(OP)?;
        ensure_user_in_group(user, dataproduct.owner.group.as_str()).op(OP)?;
        self.ensure_shareable(&dataset, &subject).op(OP)?;

        let bigquery = self
            .dataset_repository
            .get_bigquery_datasource(dataset.id)
            .await
            .op(OP)?;
        let member = subject.to_string();

        if bigquery.has_pseudo_columns() {
            self.grant_joinable_views(&bigquery, &subject, gcp_project_id)
                .await
                .op(OP)?;
        }

        self.bigquery_api
            .grant(
                bigquery.project_id.as_str(),
                bigquery.dataset.as_str(),
                bigquery.table.as_str(),
                member.as_str(),
            )
            .await
            .op(OP)?;

        let access = match self
            .access_repository
            .grant_access_to_dataset_and_renew(GrantAccessRecord {
                dataset_id: dataset.id,
                subject: subject.clone(),
                expires: input.expires,
                granter: user.email().to_owned(),
            })
            .await
        {
            Ok(access) => access,
            Err(ledger_error) => {
                error!(
                    dataset_id = %dataset.id,
                    subject = %subject,
                    error = %ledger_error,
                    "bigquery access granted but the access was not recorded"
                );
                return Err(ledger_error.with_op(OP));
            }
        };

        info!(
            dataset_id = %dataset.id,
            access_id = %access.id,
            subject = %subject,
            granter = user.email(),
            "access granted"
        );

        self.propagate_grant(dataset.id, &subject).await;
        Ok(access)
    }

    /// Revokes an access.
    ///
    /// Allowed for members of the owning group and for the subject itself.
    pub async fn revoke_access_to_dataset(
        &self,
        user: &User,
        access_id: AccessId,
        gcp_project_id: &str,
    ) -> AppResult<()> {
        const OP: &str = "access_service.revoke_access_to_dataset";

        let access = self.access_repository.find_access(access_id).await.op(OP)?;
        let (dataset, dataproduct) = self.owning_dataproduct(access.dataset_id).await.op(OP)?;

        let revokes_own_access = Subject::user(user.email())
            .map(|own| own == access.subject)
            .unwrap_or(false);
        if !revokes_own_access {
            ensure_user_in_group(user, dataproduct.owner.group.as_str()).op(OP)?;
        }

        let bigquery = self
            .dataset_repository
            .get_bigquery_datasource(dataset.id)
            .await
            .op(OP)?;

        if bigquery.has_pseudo_columns() {
            self.revoke_joinable_views(&bigquery, &access.subject, gcp_project_id)
                .await
                .op(OP)?;
        }

        self.bigquery_api
            .revoke(
                bigquery.project_id.as_str(),
                bigquery.dataset.as_str(),
                bigquery.table.as_str(),
                access.subject.to_string().as_str(),
            )
            .await
            .op(OP)?;

        if let Err(ledger_error) = self
            .access_repository
            .revoke_access_to_dataset(access.id)
            .await
        {
            error!(
                access_id = %access.id,
                subject = %access.subject,
                error = %ledger_error,
                "bigquery access revoked but the access is still recorded as active"
            );
            return Err(ledger_error.with_op(OP));
        }

        info!(
            dataset_id = %dataset.id,
            access_id = %access.id,
            subject = %access.subject,
            revoked_by = user.email(),
            "access revoked"
        );

        self.propagate_revoke(dataset.id, &access.subject).await;
        Ok(())
    }

    /// Lists active accesses to a dataset for members of the owning group.
    pub async fn list_active_accesses(
        &self,
        user: &User,
        dataset_id: DatasetId,
    ) -> AppResult<Vec<Access>> {
        const OP: &str = "access_service.list_active_accesses";

        let (_, dataproduct) = self.owning_dataproduct(dataset_id).await.op(OP)?;
        ensure_user_in_group(user, dataproduct.owner.group.as_str()).op(OP)?;

        self.access_repository
            .list_active_access_to_dataset(dataset_id)
            .await
            .op(OP)
    }

    async fn grant_joinable_views(
        &self,
        bigquery: &BigQuery,
        subject: &Subject,
        gcp_project_id: &str,
    ) -> AppResult<()> {
        let views = self
            .joinable_view_repository
            .list_joinable_views_for_reference_and_user(subject.identifier(), bigquery.dataset_id)
            .await?;
        let view_table = bigquery.joinable_view_name();
        let member = subject.to_string();

        let mut granted = Vec::with_capacity(views.len());
        for view in views {
            if let Err(error) = self
                .bigquery_api
                .grant(
                    gcp_project_id,
                    view.bigquery_dataset.as_str(),
                    view_table.as_str(),
                    member.as_str(),
                )
                .await
            {
                log_partial_views(
                    "grant",
                    bigquery.dataset_id,
                    &granted,
                    view.bigquery_dataset.as_str(),
                );
                return Err(error);
            }
            granted.push(view.bigquery_dataset);
        }

        Ok(())
    }

    async fn revoke_joinable_views(
        &self,
        bigquery: &BigQuery,
        subject: &Subject,
        gcp_project_id: &str,
    ) -> AppResult<()> {
        let views = self
            .joinable_view_repository
            .list_joinable_views_for_reference_and_user(subject.identifier(), bigquery.dataset_id)
            .await?;
        let view_table = bigquery.joinable_view_name();
        let member = subject.to_string();

        let mut revoked = Vec::with_capacity(views.len());
        for view in views {
            if let Err(error) = self
                .bigquery_api
                .revoke(
                    gcp_project_id,
                    view.bigquery_dataset.as_str(),
                    view_table.as_str(),
                    member.as_str(),
                )
                .await
            {
                log_partial_views(
                    "revoke",
                    bigquery.dataset_id,
                    &revoked,
                    view.bigquery_dataset.as_str(),
                );
                return Err(error);
            }
            revoked.push(view.bigquery_dataset);
        }

        Ok(())
    }
}
