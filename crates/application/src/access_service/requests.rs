use nada_core::{AppError, AppResult, ResultExt, User};
use nada_domain::{Access, AccessRequest, AccessRequestId, DatasetId};
use tracing::{error, info, warn};

use super::{
    AccessService, CreateAccessRequestInput, UpdateAccessRequestInput, ensure_future_expiry,
    ensure_request_owner, resolve_subject,
};
use crate::access_ports::{AccessRequestNotification, NewAccessRequest, UpdateAccessRequestRecord};
use crate::authorization::ensure_user_in_group;

impl AccessService {
    /// Creates a pending access request and notifies the owning team.
    pub async fn create_access_request(
        &self,
        user: &User,
        input: CreateAccessRequestInput,
    ) -> AppResult<AccessRequest> {
        const OP: &str = "access_service.create_access_request";

        ensure_future_expiry(input.expires).op(OP)?;
        let subject = resolve_subject(user, input.subject.as_deref(), input.subject_type).op(OP)?;
        let owner = input
            .owner
            .unwrap_or_else(|| user.email().to_owned())
            .to_lowercase();

        let (dataset, dataproduct) = self.owning_dataproduct(input.dataset_id).await.op(OP)?;

        let polly_id = match input.polly {
            Some(polly) => Some(
                self.polly_repository
                    .create_polly_documentation(polly)
                    .await
                    .op(OP)?
                    .id,
            ),
            None => None,
        };

        let request = self
            .access_repository
            .create_access_request(NewAccessRequest {
                dataset_id: dataset.id,
                subject,
                owner,
                expires: input.expires,
                polly_id,
            })
            .await
            .op(OP)?;

        info!(
            request_id = %request.id,
            dataset_id = %request.dataset_id,
            subject = %request.subject,
            "access request created"
        );

        if let Some(notifier) = &self.notifier
            && let Err(error) = notifier
                .notify_access_request(AccessRequestNotification {
                    request: request.clone(),
                    dataset_name: dataset.name.clone(),
                    dataproduct_name: dataproduct.name.clone(),
                    team_contact: dataproduct.owner.team_contact.clone(),
                })
                .await
        {
            warn!(request_id = %request.id, error = %error, "access request notification failed");
        }

        Ok(request)
    }

    /// Updates the owner, expiry or purpose of a pending access request.
    pub async fn update_access_request(
        &self,
        user: &User,
        input: UpdateAccessRequestInput,
    ) -> AppResult<AccessRequest> {
        const OP: &str = "access_service.update_access_request";

        let request = self.pending_request_owned_by(user, input.id).await.op(OP)?;
        ensure_future_expiry(input.expires).op(OP)?;

        let polly_id = match input.polly {
            Some(polly) => Some(
                self.polly_repository
                    .create_polly_documentation(polly)
                    .await
                    .op(OP)?
                    .id,
            ),
            None => request.polly.as_ref().map(|polly| polly.id),
        };

        self.access_repository
            .update_access_request(UpdateAccessRequestRecord {
                id: request.id,
                owner: input.owner.unwrap_or(request.owner).to_lowercase(),
                expires: input.expires,
                polly_id,
            })
            .await
            .op(OP)
    }

    /// Deletes a pending access request.
    pub async fn delete_access_request(
        &self,
        user: &User,
        request_id: AccessRequestId,
    ) -> AppResult<()> {
        const OP: &str = "access_service.delete_access_request";

        let request = self.pending_request_owned_by(user, request_id).await.op(OP)?;
        self.access_repository
            .delete_access_request(request.id)
            .await
            .op(OP)?;

        info!(request_id = %request.id, "access request deleted");
        Ok(())
    }

    /// Lists access requests for a dataset.
    ///
    /// Members of the owning group see every request; other users see the
    /// requests they own.
    pub async fn list_access_requests_for_dataset(
        &self,
        user: &User,
        dataset_id: DatasetId,
    ) -> AppResult<Vec<AccessRequest>> {
        const OP: &str = "access_service.list_access_requests_for_dataset";

        let (_, dataproduct) = self.owning_dataproduct(dataset_id).await.op(OP)?;
        let requests = self
            .access_repository
            .list_access_requests_for_dataset(dataset_id)
            .await
            .op(OP)?;

        if user.is_member_of(dataproduct.owner.group.as_str()) {
            return Ok(requests);
        }

        Ok(requests
            .into_iter()
            .filter(|request| request.owner.eq_ignore_ascii_case(user.email()))
            .collect())
    }

    /// Approves a pending request: BigQuery grant first, ledger afterwards.
    pub async fn approve_access_request(
        &self,
        user: &User,
        request_id: AccessRequestId,
    ) -> AppResult<Access> {
        const OP: &str = "access_service.approve_access_request";

        let request = self
            .access_repository
            .find_access_request(request_id)
            .await
            .op(OP)?;
        let (dataset, dataproduct) = self.owning_dataproduct(request.dataset_id).await.op(OP)?;
        ensure_user_in_group(user, dataproduct.owner.group.as_str()).op(OP)?;

        if !request.is_pending() {
            return Err(AppError::InvalidRequest(format!(
                "access request '{}' is already {}",
                request.id,
                request.status.as_str()
            ))
            .with_op(OP));
        }

        self.ensure_shareable(&dataset, &request.subject).op(OP)?;

        let bigquery = self
            .dataset_repository
            .get_bigquery_datasource(dataset.id)
            .await
            .op(OP)?;
        self.bigquery_api
            .grant(
                bigquery.project_id.as_str(),
                bigquery.dataset.as_str(),
                bigquery.table.as_str(),
                request.subject.to_string().as_str(),
            )
            .await
            .op(OP)?;

        let access = match self
            .access_repository
            .approve_access_request(request.id, user.email())
            .await
        {
            Ok(access) => access,
            Err(ledger_error) => {
                error!(
                    request_id = %request.id,
                    subject = %request.subject,
                    error = %ledger_error,
                    "bigquery access granted but approval was not recorded"
                );
                return Err(ledger_error.with_op(OP));
            }
        };

        info!(
            request_id = %request.id,
            access_id = %access.id,
            granter = user.email(),
            "access request approved"
        );

        self.propagate_grant(dataset.id, &access.subject).await;
        Ok(access)
    }

    /// Denies a pending request. No external calls are made.
    pub async fn deny_access_request(
        &self,
        user: &User,
        request_id: AccessRequestId,
        reason: Option<&str>,
    ) -> AppResult<()> {
        const OP: &str = "access_service.deny_access_request";

        let request = self
            .access_repository
            .find_access_request(request_id)
            .await
            .op(OP)?;
        let (_, dataproduct) = self.owning_dataproduct(request.dataset_id).await.op(OP)?;
        ensure_user_in_group(user, dataproduct.owner.group.as_str()).op(OP)?;

        if !request.is_pending() {
            return Err(AppError::InvalidRequest(format!(
                "access request '{}' is already {}",
                request.id,
                request.status.as_str()
            ))
            .with_op(OP));
        }

        self.access_repository
            .deny_access_request(request.id, user.email(), reason)
            .await
            .op(OP)?;

        info!(request_id = %request.id, granter = user.email(), "access request denied");
        Ok(())
    }

    async fn pending_request_owned_by(
        &self,
        user: &User,
        request_id: AccessRequestId,
    ) -> AppResult<AccessRequest> {
        let request = self
            .access_repository
            .find_access_request(request_id)
            .await?;
        ensure_request_owner(user, request.owner.as_str())?;

        if !request.is_pending() {
            return Err(AppError::InvalidRequest(format!(
                "access request '{}' is already {} and can no longer be changed",
                request.id,
                request.status.as_str()
            )));
        }

        Ok(request)
    }
}
