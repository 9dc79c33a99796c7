use super::*;

/// Approving answers with the created access; denying has no body.
pub async fn process_access_request_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(request_id): Path<AccessRequestId>,
    Query(query): Query<ProcessAccessRequestQuery>,
) -> ApiResult<(StatusCode, Json<Option<AccessResponse>>)> {
    match query.action {
        ProcessAccessRequestAction::Approve => {
            let access = state
                .access_service
                .approve_access_request(&user, request_id)
                .await?;
            Ok((StatusCode::OK, Json(Some(AccessResponse::from(access)))))
        }
        ProcessAccessRequestAction::Deny => {
            state
                .access_service
                .deny_access_request(&user, request_id, query.reason.as_deref())
                .await?;
            Ok((StatusCode::OK, Json(None)))
        }
    }
}
