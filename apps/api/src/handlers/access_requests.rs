use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use nada_application::{CreateAccessRequestInput, UpdateAccessRequestInput};
use nada_core::User;
use nada_domain::AccessRequestId;

use crate::dto::{
    AccessRequestResponse, AccessResponse, CreateAccessRequestRequest, ListAccessRequestsQuery,
    ProcessAccessRequestAction, ProcessAccessRequestQuery, UpdateAccessRequestRequest,
};
use crate::error::ApiResult;
use crate::state::AppState;

mod decisions;
mod lifecycle;

pub use decisions::process_access_request_handler;
pub use lifecycle::{
    create_access_request_handler, delete_access_request_handler, list_access_requests_handler,
    update_access_request_handler,
};
