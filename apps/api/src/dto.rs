mod access;
mod metabase;

use serde::Serialize;

pub use access::{
    AccessRequestResponse, AccessResponse, CreateAccessRequestRequest, GrantAccessRequest,
    ListAccessRequestsQuery, ProcessAccessRequestAction, ProcessAccessRequestQuery,
    RevokeAccessQuery, UpdateAccessRequestRequest,
};
pub use metabase::{MapDatasetRequest, ThirdPartyMappingResponse};

/// Health response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
