use chrono::{DateTime, Utc};
use nada_domain::{
    Access, AccessId, AccessRequest, AccessRequestId, DatasetId, Polly, PollyInput, SubjectType,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Incoming payload for a new access request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccessRequestRequest {
    pub dataset_id: DatasetId,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub subject_type: Option<SubjectType>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub polly: Option<PollyInput>,
}

/// Incoming payload for changing a pending access request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccessRequestRequest {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub polly: Option<PollyInput>,
}

/// Decision taken on an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessAccessRequestAction {
    Approve,
    Deny,
}

#[derive(Debug, Deserialize)]
pub struct ProcessAccessRequestQuery {
    pub action: ProcessAccessRequestAction,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAccessRequestsQuery {
    pub dataset_id: DatasetId,
}

/// Incoming payload for a direct grant.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantAccessRequest {
    pub dataset_id: DatasetId,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub subject_type: Option<SubjectType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeAccessQuery {
    pub access_id: AccessId,
}

/// API representation of purpose documentation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollyResponse {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub url: String,
}

impl From<Polly> for PollyResponse {
    fn from(value: Polly) -> Self {
        Self {
            id: value.id,
            external_id: value.external_id,
            name: value.name,
            url: value.url,
        }
    }
}

/// API representation of an access request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestResponse {
    pub id: AccessRequestId,
    pub dataset_id: DatasetId,
    pub subject: String,
    pub subject_type: SubjectType,
    pub owner: String,
    pub status: &'static str,
    pub expires: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub granter: Option<String>,
    pub closed: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub polly: Option<PollyResponse>,
}

impl From<AccessRequest> for AccessRequestResponse {
    fn from(value: AccessRequest) -> Self {
        Self {
            id: value.id,
            dataset_id: value.dataset_id,
            subject: value.subject.identifier().to_owned(),
            subject_type: value.subject.subject_type(),
            owner: value.owner,
            status: value.status.as_str(),
            expires: value.expires,
            created: value.created,
            granter: value.granter,
            closed: value.closed,
            reason: value.reason,
            polly: value.polly.map(PollyResponse::from),
        }
    }
}

/// API representation of a granted access.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResponse {
    pub id: AccessId,
    pub subject: String,
    pub granter: String,
    pub expires: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub revoked: Option<DateTime<Utc>>,
    pub dataset_id: DatasetId,
    pub access_request_id: Option<AccessRequestId>,
}

impl From<Access> for AccessResponse {
    fn from(value: Access) -> Self {
        Self {
            id: value.id,
            subject: value.subject.to_string(),
            granter: value.granter,
            expires: value.expires,
            created: value.created,
            revoked: value.revoked,
            dataset_id: value.dataset_id,
            access_request_id: value.access_request_id,
        }
    }
}
