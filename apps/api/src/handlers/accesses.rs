use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use nada_application::GrantAccessInput;
use nada_core::User;
use nada_domain::DatasetId;

use crate::dto::{AccessResponse, GrantAccessRequest, RevokeAccessQuery};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn grant_access_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<GrantAccessRequest>,
) -> ApiResult<(StatusCode, Json<AccessResponse>)> {
    let access = state
        .access_service
        .grant_access_to_dataset(
            &user,
            GrantAccessInput {
                dataset_id: payload.dataset_id,
                expires: payload.expires,
                subject: payload.subject,
                subject_type: payload.subject_type,
            },
            state.gcp_project_id.as_str(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(AccessResponse::from(access))))
}

pub async fn revoke_access_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<RevokeAccessQuery>,
) -> ApiResult<StatusCode> {
    state
        .access_service
        .revoke_access_to_dataset(&user, query.access_id, state.gcp_project_id.as_str())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_dataset_accesses_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(dataset_id): Path<DatasetId>,
) -> ApiResult<Json<Vec<AccessResponse>>> {
    let accesses = state
        .access_service
        .list_active_accesses(&user, dataset_id)
        .await?
        .into_iter()
        .map(AccessResponse::from)
        .collect();

    Ok(Json(accesses))
}
