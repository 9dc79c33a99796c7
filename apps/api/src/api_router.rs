use axum::Router;
use axum::middleware::from_fn;
use axum::routing::{get, post, put};
use nada_core::AppError;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, middleware};

mod cors;

pub fn build_router(app_state: AppState, frontend_url: &str) -> Result<Router, AppError> {
    let protected_routes = Router::new()
        .route(
            "/api/accessRequests",
            get(handlers::access_requests::list_access_requests_handler)
                .post(handlers::access_requests::create_access_request_handler),
        )
        .route(
            "/api/accessRequests/{request_id}",
            put(handlers::access_requests::update_access_request_handler)
                .delete(handlers::access_requests::delete_access_request_handler),
        )
        .route(
            "/api/accessRequests/process/{request_id}",
            post(handlers::access_requests::process_access_request_handler),
        )
        .route(
            "/api/accesses/grant",
            post(handlers::accesses::grant_access_handler),
        )
        .route(
            "/api/accesses/revoke",
            post(handlers::accesses::revoke_access_handler),
        )
        .route(
            "/api/datasets/{dataset_id}/accesses",
            get(handlers::accesses::list_dataset_accesses_handler),
        )
        .route(
            "/api/datasets/{dataset_id}/map",
            post(handlers::metabase::map_dataset_handler),
        )
        .route(
            "/api/metabase/collectionsReport",
            get(handlers::metabase::collections_report_handler),
        )
        .route_layer(from_fn(middleware::require_auth));

    Ok(Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors::build_cors_layer(frontend_url)?)
        .with_state(app_state))
}
