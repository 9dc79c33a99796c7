use super::*;

pub async fn create_access_request_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<CreateAccessRequestRequest>,
) -> ApiResult<(StatusCode, Json<AccessRequestResponse>)> {
    let request = state
        .access_service
        .create_access_request(
            &user,
            CreateAccessRequestInput {
                dataset_id: payload.dataset_id,
                subject: payload.subject,
                subject_type: payload.subject_type,
                owner: payload.owner,
                expires: payload.expires,
                polly: payload.polly,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(AccessRequestResponse::from(request))))
}

pub async fn update_access_request_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(request_id): Path<AccessRequestId>,
    Json(payload): Json<UpdateAccessRequestRequest>,
) -> ApiResult<Json<AccessRequestResponse>> {
    let request = state
        .access_service
        .update_access_request(
            &user,
            UpdateAccessRequestInput {
                id: request_id,
                owner: payload.owner,
                expires: payload.expires,
                polly: payload.polly,
            },
        )
        .await?;

    Ok(Json(AccessRequestResponse::from(request)))
}

pub async fn delete_access_request_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(request_id): Path<AccessRequestId>,
) -> ApiResult<StatusCode> {
    state
        .access_service
        .delete_access_request(&user, request_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_access_requests_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListAccessRequestsQuery>,
) -> ApiResult<Json<Vec<AccessRequestResponse>>> {
    let requests = state
        .access_service
        .list_access_requests_for_dataset(&user, query.dataset_id)
        .await?
        .into_iter()
        .map(AccessRequestResponse::from)
        .collect();

    Ok(Json(requests))
}
