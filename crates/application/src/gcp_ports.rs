use async_trait::async_trait;
use nada_core::AppResult;

/// BigQuery access-control capability.
///
/// `member` is always a fully qualified `"type:identifier"` principal. Grants
/// and revokes are idempotent.
#[async_trait]
pub trait BigQueryApi: Send + Sync {
    /// Grants read access on a table to a member.
    async fn grant(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        member: &str,
    ) -> AppResult<()>;

    /// Revokes read access on a table from a member.
    async fn revoke(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        member: &str,
    ) -> AppResult<()>;

    /// Authorizes a view to read from the source dataset.
    async fn add_to_authorized_views(
        &self,
        source_project_id: &str,
        source_dataset: &str,
        view_project_id: &str,
        view_dataset: &str,
        view_table: &str,
    ) -> AppResult<()>;

    /// Creates a view hashing the pseudo columns of a table.
    async fn create_pseudonymised_view(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        pseudo_columns: &[String],
    ) -> AppResult<PseudonymisedView>;
}

/// Location of a created pseudonymised view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudonymisedView {
    /// Project hosting the view.
    pub project_id: String,
    /// Dataset hosting the view.
    pub dataset: String,
    /// View name.
    pub table: String,
}

/// Project-level IAM binding attached to a service account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountBinding {
    /// Project the binding is created in.
    pub project_id: String,
    /// Role granted to the account.
    pub role: String,
}

/// Desired service account with its binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountRequest {
    /// Project owning the service account.
    pub project_id: String,
    /// Account id, the local part of the email.
    pub account_id: String,
    /// Display name.
    pub display_name: String,
    /// Description.
    pub description: String,
    /// Binding to ensure.
    pub binding: ServiceAccountBinding,
}

/// Service account with a freshly created key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountWithPrivateKey {
    /// Service account email.
    pub email: String,
    /// JSON key file contents.
    pub key_json: String,
}

/// Service account lifecycle capability.
#[async_trait]
pub trait ServiceAccountApi: Send + Sync {
    /// Ensures the account and binding exist and rotates its user managed keys.
    ///
    /// Every call returns a new key; older user managed keys are deleted.
    async fn ensure_service_account_with_key_and_binding(
        &self,
        request: &ServiceAccountRequest,
    ) -> AppResult<ServiceAccountWithPrivateKey>;

    /// Deletes the account and removes it from project bindings.
    async fn delete_service_account_and_bindings(
        &self,
        project_id: &str,
        email: &str,
    ) -> AppResult<()>;
}
