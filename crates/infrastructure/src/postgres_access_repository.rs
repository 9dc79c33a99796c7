//! PostgreSQL-backed access ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nada_application::{
    AccessRepository, GrantAccessRecord, NewAccessRequest, UpdateAccessRequestRecord,
};
use nada_core::{AppError, AppResult};
use nada_domain::{
    Access, AccessId, AccessRequest, AccessRequestId, DatasetId, Polly, Subject,
};

mod grants;
mod requests;


/// PostgreSQL implementation of the access repository port.
#[derive(Clone)]
pub struct PostgresAccessRepository {
    pool: PgPool,
}

impl PostgresAccessRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccessRow {
    id: Uuid,
    dataset_id: Uuid,
    subject: String,
    granter: String,
    expires: Option<DateTime<Utc>>,
    created: DateTime<Utc>,
    revoked: Option<DateTime<Utc>>,
    access_request_id: Option<Uuid>,
}

impl TryFrom<AccessRow> for Access {
    type Error = AppError;

    fn try_from(row: AccessRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: AccessId::from_uuid(row.id),
            subject: Subject::parse(row.subject.as_str())?,
            granter: row.granter,
            expires: row.expires,
            created: row.created,
            revoked: row.revoked,
            dataset_id: DatasetId::from_uuid(row.dataset_id),
            access_request_id: row.access_request_id.map(AccessRequestId::from_uuid),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccessRequestRow {
    id: Uuid,
    dataset_id: Uuid,
    subject: String,
    owner: String,
    status: String,
    expires: Option<DateTime<Utc>>,
    created: DateTime<Utc>,
    granter: Option<String>,
    closed: Option<DateTime<Utc>>,
    reason: Option<String>,
    polly_id: Option<Uuid>,
    polly_external_id: Option<String>,
    polly_name: Option<String>,
    polly_url: Option<String>,
}

impl TryFrom<AccessRequestRow> for AccessRequest {
    type Error = AppError;

    fn try_from(row: AccessRequestRow) -> Result<Self, Self::Error> {
        let polly = row.polly_id.map(|id| Polly {
            id,
            external_id: row.polly_external_id.unwrap_or_default(),
            name: row.polly_name.unwrap_or_default(),
            url: row.polly_url.unwrap_or_default(),
        });

        Ok(Self {
            id: AccessRequestId::from_uuid(row.id),
            dataset_id: DatasetId::from_uuid(row.dataset_id),
            subject: Subject::parse(row.subject.as_str())?,
            owner: row.owner,
            status: row.status.parse()?,
            expires: row.expires,
            created: row.created,
            granter: row.granter,
            closed: row.closed,
            reason: row.reason,
            polly,
        })
    }
}

const ACCESS_COLUMNS: &str = r#"
    id, dataset_id, subject, granter, expires, created, revoked, access_request_id
"#;

const ACCESS_REQUEST_SELECT: &str = r#"
    SELECT
        r.id,
        r.dataset_id,
        r.subject,
        r.owner,
        r.status,
        r.expires,
        r.created,
        r.granter,
        r.closed,
        r.reason,
        p.id AS polly_id,
        p.external_id AS polly_external_id,
        p.name AS polly_name,
        p.url AS polly_url
    FROM dataset_access_requests r
    LEFT JOIN polly_documentation p ON p.id = r.polly_documentation_id
"#;

#[async_trait]
impl AccessRepository for PostgresAccessRepository {
    async fn find_access(&self, access_id: AccessId) -> AppResult<Access> {
        self.find_access_impl(access_id).await
    }

    async fn list_active_access_to_dataset(&self, dataset_id: DatasetId) -> AppResult<Vec<Access>> {
        self.list_active_access_to_dataset_impl(dataset_id).await
    }

    async fn grant_access_to_dataset_and_renew(
        &self,
        record: GrantAccessRecord,
    ) -> AppResult<Access> {
        self.grant_access_to_dataset_and_renew_impl(record).await
    }

    async fn revoke_access_to_dataset(&self, access_id: AccessId) -> AppResult<()> {
        self.revoke_access_to_dataset_impl(access_id).await
    }

    async fn create_access_request(&self, request: NewAccessRequest) -> AppResult<AccessRequest> {
        self.create_access_request_impl(request).await
    }

    async fn find_access_request(&self, request_id: AccessRequestId) -> AppResult<AccessRequest> {
        self.find_access_request_impl(request_id).await
    }

    async fn list_access_requests_for_dataset(
        &self,
        dataset_id: DatasetId,
    ) -> AppResult<Vec<AccessRequest>> {
        self.list_access_requests_for_dataset_impl(dataset_id).await
    }

    async fn update_access_request(
        &self,
        record: UpdateAccessRequestRecord,
    ) -> AppResult<AccessRequest> {
        self.update_access_request_impl(record).await
    }

    async fn delete_access_request(&self, request_id: AccessRequestId) -> AppResult<()> {
        self.delete_access_request_impl(request_id).await
    }

    async fn approve_access_request(
        &self,
        request_id: AccessRequestId,
        granter: &str,
    ) -> AppResult<Access> {
        self.approve_access_request_impl(request_id, granter).await
    }

    async fn deny_access_request(
        &self,
        request_id: AccessRequestId,
        granter: &str,
        reason: Option<&str>,
    ) -> AppResult<()> {
        self.deny_access_request_impl(request_id, granter, reason)
            .await
    }
}

fn database_error(operation: &str, error: sqlx::Error) -> AppError {
    AppError::Database(format!("failed to {operation}: {error}"))
}
