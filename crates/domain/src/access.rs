use std::str::FromStr;

use chrono::{DateTime, Utc};
use nada_core::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AccessId, AccessRequestId, DatasetId, Subject};

/// Granted permission for one subject on one dataset.
///
/// Rows are never deleted; revocation sets `revoked` so the table doubles as
/// an audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    /// Stable access identifier.
    pub id: AccessId,
    /// Subject holding the access.
    pub subject: Subject,
    /// Email of the user who granted the access.
    pub granter: String,
    /// Optional expiry.
    pub expires: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Revocation timestamp.
    pub revoked: Option<DateTime<Utc>>,
    /// Dataset the access applies to.
    pub dataset_id: DatasetId,
    /// Access request this grant resolved, if any.
    pub access_request_id: Option<AccessRequestId>,
}

impl Access {
    /// Returns whether the access is neither revoked nor expired at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked.is_none() && self.expires.is_none_or(|expires| expires > now)
    }
}

/// Decision state of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRequestStatus {
    /// Waiting for a decision from the dataset owner.
    Pending,
    /// Approved; an access row was created.
    Approved,
    /// Denied with an optional reason.
    Denied,
}

impl AccessRequestStatus {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }
}

impl FromStr for AccessRequestStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            _ => Err(AppError::Internal(format!(
                "unknown access request status '{value}'"
            ))),
        }
    }
}

/// Purpose documentation attached to an access request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polly {
    /// Internal identifier.
    pub id: Uuid,
    /// Identifier in the external purpose catalog.
    pub external_id: String,
    /// Purpose name.
    pub name: String,
    /// Link to the purpose documentation.
    pub url: String,
}

/// Purpose documentation supplied by a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollyInput {
    /// Identifier in the external purpose catalog.
    pub external_id: String,
    /// Purpose name.
    pub name: String,
    /// Link to the purpose documentation.
    pub url: String,
}

/// Request for access to a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Stable request identifier.
    pub id: AccessRequestId,
    /// Dataset access is requested for.
    pub dataset_id: DatasetId,
    /// Subject that should receive access.
    pub subject: Subject,
    /// Email of the user responsible for the request.
    pub owner: String,
    /// Decision state.
    pub status: AccessRequestStatus,
    /// Requested expiry of the resulting access.
    pub expires: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Email of the deciding user.
    pub granter: Option<String>,
    /// Decision timestamp.
    pub closed: Option<DateTime<Utc>>,
    /// Reason given when denied.
    pub reason: Option<String>,
    /// Attached purpose documentation.
    pub polly: Option<Polly>,
}

impl AccessRequest {
    /// Returns whether the request is still awaiting a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == AccessRequestStatus::Pending
    }
}
