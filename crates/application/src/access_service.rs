//! Synchronous access orchestration.
//!
//! Every mutating operation talks to BigQuery first and records the outcome in
//! the access ledger afterwards. The two writes are not transactional: a
//! ledger failure after a successful external grant leaves a grant without a
//! row. That gap is logged, not compensated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nada_core::{AppError, AppResult, User};
use nada_domain::{
    AccessRequestId, Dataproduct, Dataset, DatasetId, PiiLevel, PollyInput, Subject, SubjectType,
};
use tracing::warn;

use crate::access_ports::{
    AccessRepository, AccessRequestNotifier, DatasetRepository, JoinableViewRepository,
    MetabaseAccessPropagator, PollyRepository,
};
use crate::authorization::ensure_user_in_group;
use crate::gcp_ports::BigQueryApi;
use crate::metabase_ports::MappingQueue;

mod grants;
mod requests;


/// Input for creating an access request.
#[derive(Debug, Clone, Default)]
pub struct CreateAccessRequestInput {
    /// Dataset access is requested for.
    pub dataset_id: DatasetId,
    /// Subject identifier; defaults to the requesting user.
    pub subject: Option<String>,
    /// Subject type; defaults to `user`.
    pub subject_type: Option<SubjectType>,
    /// Responsible owner; defaults to the requesting user.
    pub owner: Option<String>,
    /// Requested expiry.
    pub expires: Option<DateTime<Utc>>,
    /// Purpose documentation.
    pub polly: Option<PollyInput>,
}

/// Input for updating a pending access request.
#[derive(Debug, Clone)]
pub struct UpdateAccessRequestInput {
    /// Request to update.
    pub id: AccessRequestId,
    /// New owner; unchanged when absent.
    pub owner: Option<String>,
    /// New expiry.
    pub expires: Option<DateTime<Utc>>,
    /// New purpose documentation.
    pub polly: Option<PollyInput>,
}

/// Input for granting access directly.
#[derive(Debug, Clone, Default)]
pub struct GrantAccessInput {
    /// Dataset to grant access to.
    pub dataset_id: DatasetId,
    /// Optional expiry.
    pub expires: Option<DateTime<Utc>>,
    /// Subject identifier; defaults to the granting user.
    pub subject: Option<String>,
    /// Subject type; defaults to `user`.
    pub subject_type: Option<SubjectType>,
}

/// Access request and grant orchestration service.
#[derive(Clone)]
pub struct AccessService {
    access_repository: Arc<dyn AccessRepository>,
    dataset_repository: Arc<dyn DatasetRepository>,
    joinable_view_repository: Arc<dyn JoinableViewRepository>,
    polly_repository: Arc<dyn PollyRepository>,
    bigquery_api: Arc<dyn BigQueryApi>,
    notifier: Option<Arc<dyn AccessRequestNotifier>>,
    metabase: Option<Arc<dyn MetabaseAccessPropagator>>,
    mapping_queue: Option<Arc<dyn MappingQueue>>,
    all_users_group: String,
}

impl AccessService {
    /// Creates an access service.
    #[must_use]
    pub fn new(
        access_repository: Arc<dyn AccessRepository>,
        dataset_repository: Arc<dyn DatasetRepository>,
        joinable_view_repository: Arc<dyn JoinableViewRepository>,
        polly_repository: Arc<dyn PollyRepository>,
        bigquery_api: Arc<dyn BigQueryApi>,
        all_users_group: impl Into<String>,
    ) -> Self {
        Self {
            access_repository,
            dataset_repository,
            joinable_view_repository,
            polly_repository,
            bigquery_api,
            notifier: None,
            metabase: None,
            mapping_queue: None,
            all_users_group: all_users_group.into().to_lowercase(),
        }
    }

    /// Adds owner notifications for new access requests.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn AccessRequestNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Mirrors grants and revocations into Metabase.
    #[must_use]
    pub fn with_metabase(
        mut self,
        metabase: Arc<dyn MetabaseAccessPropagator>,
        mapping_queue: Arc<dyn MappingQueue>,
    ) -> Self {
        self.metabase = Some(metabase);
        self.mapping_queue = Some(mapping_queue);
        self
    }

    async fn owning_dataproduct(&self, dataset_id: DatasetId) -> AppResult<(Dataset, Dataproduct)> {
        let dataset = self.dataset_repository.get_dataset(dataset_id).await?;
        let dataproduct = self.dataset_repository.get_dataproduct(&dataset).await?;
        Ok((dataset, dataproduct))
    }

    fn ensure_shareable(&self, dataset: &Dataset, subject: &Subject) -> AppResult<()> {
        if dataset.pii == PiiLevel::Sensitive && subject.is_group(self.all_users_group.as_str()) {
            return Err(AppError::InvalidRequest(format!(
                "dataset '{}' contains sensitive personal data and cannot be shared with '{}'",
                dataset.id, self.all_users_group
            )));
        }

        Ok(())
    }

    async fn propagate_grant(&self, dataset_id: DatasetId, subject: &Subject) {
        if let Some(metabase) = &self.metabase
            && let Err(error) = metabase.grant_metabase_access(dataset_id, subject).await
        {
            warn!(
                %dataset_id,
                %subject,
                error = %error,
                "metabase access grant failed; bigquery grant is kept"
            );
        }

        if let Some(queue) = &self.mapping_queue {
            queue.queue(dataset_id);
        }
    }

    async fn propagate_revoke(&self, dataset_id: DatasetId, subject: &Subject) {
        if let Some(metabase) = &self.metabase
            && let Err(error) = metabase.revoke_metabase_access(dataset_id, subject).await
        {
            warn!(
                %dataset_id,
                %subject,
                error = %error,
                "metabase access revoke failed; bigquery revoke is kept"
            );
        }
    }
}

fn resolve_subject(
    user: &User,
    subject: Option<&str>,
    subject_type: Option<SubjectType>,
) -> AppResult<Subject> {
    Subject::new(
        subject_type.unwrap_or(SubjectType::User),
        subject.unwrap_or(user.email()),
    )
}

fn ensure_future_expiry(expires: Option<DateTime<Utc>>) -> AppResult<()> {
    match expires {
        Some(expires) if expires <= Utc::now() => Err(AppError::InvalidRequest(format!(
            "expiry {expires} is in the past"
        ))),
        _ => Ok(()),
    }
}

/// Allows the request owner, or a member of the owning group, through.
fn ensure_request_owner(user: &User, owner: &str) -> AppResult<()> {
    if user.email().eq_ignore_ascii_case(owner) {
        return Ok(());
    }

    ensure_user_in_group(user, owner)
}

fn log_partial_views(action: &str, dataset_id: DatasetId, done: &[String], failed: &str) {
    warn!(
        %dataset_id,
        action,
        completed_views = ?done,
        failed_view = failed,
        "joinable view propagation stopped halfway; completed views need manual cleanup"
    );
}
