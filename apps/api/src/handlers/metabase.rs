use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use nada_application::CollectionsReport;
use nada_core::User;
use nada_domain::DatasetId;

use crate::dto::{MapDatasetRequest, ThirdPartyMappingResponse};
use crate::error::ApiResult;
use crate::state::AppState;

/// Records the desired services; the mapper applies them asynchronously.
pub async fn map_dataset_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(dataset_id): Path<DatasetId>,
    Json(payload): Json<MapDatasetRequest>,
) -> ApiResult<(StatusCode, Json<ThirdPartyMappingResponse>)> {
    let mapping = state
        .metabase_service
        .request_mapping(&user, dataset_id, payload.services.as_slice())
        .await?;

    Ok((StatusCode::ACCEPTED, Json(ThirdPartyMappingResponse::from(mapping))))
}

pub async fn collections_report_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<CollectionsReport>> {
    let report = state
        .collections_syncer
        .collections_report_for(&user)
        .await?;

    Ok(Json(report))
}
