use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nada_core::AppResult;
use nada_domain::{
    Access, AccessId, AccessRequest, AccessRequestId, BigQuery, Dataproduct, Dataset, DatasetId,
    JoinableView, Polly, PollyInput, Subject,
};
use uuid::Uuid;

/// Insert payload for a pending access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessRequest {
    /// Dataset access is requested for.
    pub dataset_id: DatasetId,
    /// Subject that should receive access.
    pub subject: Subject,
    /// Email of the user responsible for the request.
    pub owner: String,
    /// Requested expiry.
    pub expires: Option<DateTime<Utc>>,
    /// Stored purpose documentation.
    pub polly_id: Option<Uuid>,
}

/// Update payload for a pending access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAccessRequestRecord {
    /// Request being updated.
    pub id: AccessRequestId,
    /// New responsible owner.
    pub owner: String,
    /// New requested expiry.
    pub expires: Option<DateTime<Utc>>,
    /// New purpose documentation reference.
    pub polly_id: Option<Uuid>,
}

/// Insert payload for a direct grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantAccessRecord {
    /// Dataset access is granted to.
    pub dataset_id: DatasetId,
    /// Subject receiving access.
    pub subject: Subject,
    /// Optional expiry.
    pub expires: Option<DateTime<Utc>>,
    /// Email of the granting user.
    pub granter: String,
}

/// Ledger of access requests and granted accesses.
#[async_trait]
pub trait AccessRepository: Send + Sync {
    /// Returns one access row, `NotExist` when missing.
    async fn find_access(&self, access_id: AccessId) -> AppResult<Access>;

    /// Lists accesses that are neither revoked nor expired.
    async fn list_active_access_to_dataset(&self, dataset_id: DatasetId) -> AppResult<Vec<Access>>;

    /// Revokes any active access of the subject and inserts a new one, atomically.
    async fn grant_access_to_dataset_and_renew(&self, record: GrantAccessRecord)
    -> AppResult<Access>;

    /// Marks an access revoked; revoking twice keeps the first timestamp.
    async fn revoke_access_to_dataset(&self, access_id: AccessId) -> AppResult<()>;

    /// Inserts a pending access request.
    async fn create_access_request(&self, request: NewAccessRequest) -> AppResult<AccessRequest>;

    /// Returns one access request, `NotExist` when missing.
    async fn find_access_request(&self, request_id: AccessRequestId) -> AppResult<AccessRequest>;

    /// Lists all requests for a dataset, newest first.
    async fn list_access_requests_for_dataset(
        &self,
        dataset_id: DatasetId,
    ) -> AppResult<Vec<AccessRequest>>;

    /// Updates a pending access request.
    async fn update_access_request(
        &self,
        record: UpdateAccessRequestRecord,
    ) -> AppResult<AccessRequest>;

    /// Deletes an access request.
    async fn delete_access_request(&self, request_id: AccessRequestId) -> AppResult<()>;

    /// Records the access and flips the request to approved in one transaction.
    async fn approve_access_request(
        &self,
        request_id: AccessRequestId,
        granter: &str,
    ) -> AppResult<Access>;

    /// Flips the request to denied.
    async fn deny_access_request(
        &self,
        request_id: AccessRequestId,
        granter: &str,
        reason: Option<&str>,
    ) -> AppResult<()>;
}

/// Read access to catalog entries owned by the dataproduct storage.
#[async_trait]
pub trait DatasetRepository: Send + Sync {
    /// Returns a dataset, `NotExist` when missing.
    async fn get_dataset(&self, dataset_id: DatasetId) -> AppResult<Dataset>;

    /// Returns the dataproduct owning a dataset.
    async fn get_dataproduct(&self, dataset: &Dataset) -> AppResult<Dataproduct>;

    /// Returns the BigQuery datasource of a dataset.
    async fn get_bigquery_datasource(&self, dataset_id: DatasetId) -> AppResult<BigQuery>;
}

/// Lookup of joinable views built on pseudonymised datasets.
#[async_trait]
pub trait JoinableViewRepository: Send + Sync {
    /// Lists joinable views owned by `owner` that reference the dataset.
    async fn list_joinable_views_for_reference_and_user(
        &self,
        owner: &str,
        dataset_id: DatasetId,
    ) -> AppResult<Vec<JoinableView>>;
}

/// Storage of purpose documentation references.
#[async_trait]
pub trait PollyRepository: Send + Sync {
    /// Stores a purpose documentation reference.
    async fn create_polly_documentation(&self, input: PollyInput) -> AppResult<Polly>;
}

/// Message sent to a dataset owner about a new access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequestNotification {
    /// The created request.
    pub request: AccessRequest,
    /// Dataset name.
    pub dataset_name: String,
    /// Dataproduct name.
    pub dataproduct_name: String,
    /// Slack channel of the owning team.
    pub team_contact: Option<String>,
}

/// Notification channel towards dataset owners.
#[async_trait]
pub trait AccessRequestNotifier: Send + Sync {
    /// Notifies the owning team about a new access request.
    async fn notify_access_request(&self, notification: AccessRequestNotification)
    -> AppResult<()>;
}

/// Mirrors ledger changes into Metabase group membership.
#[async_trait]
pub trait MetabaseAccessPropagator: Send + Sync {
    /// Adds the subject to the dataset's Metabase group when possible.
    async fn grant_metabase_access(&self, dataset_id: DatasetId, subject: &Subject)
    -> AppResult<()>;

    /// Removes the subject from Metabase, soft-deleting open datasets for all-users.
    async fn revoke_metabase_access(
        &self,
        dataset_id: DatasetId,
        subject: &Subject,
    ) -> AppResult<()>;
}
