//! nada API composition root.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod api_services;
mod dto;
mod error;
mod handlers;
mod middleware;
mod state;
mod workers;

use nada_core::AppError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api_config::{ApiConfig, init_tracing};
use crate::api_services::{AppRuntime, build_app_runtime, connect_and_migrate};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ApiConfig::load()?;
    let pool = connect_and_migrate(&config.database_url).await?;

    if config.migrate_only {
        info!("database migrations applied successfully");
        return Ok(());
    }

    let AppRuntime {
        state,
        mapper,
        mapping_receiver,
        leader,
    } = build_app_runtime(&config, pool)?;

    let shutdown = CancellationToken::new();
    let background = workers::spawn_background_workers(
        &state,
        mapper,
        mapping_receiver,
        leader,
        shutdown.clone(),
    );

    let app = api_router::build_router(state, config.frontend_url.as_str())?;
    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(%address, "nada-api listening");

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = server_shutdown.cancelled() => {}
                signal = tokio::signal::ctrl_c() => {
                    if let Err(error) = signal {
                        error!(error = %error, "failed to listen for shutdown signal");
                    }
                    info!("shutdown signal received");
                    server_shutdown.cancel();
                }
            }
        })
        .await
        .map_err(|error| AppError::Internal(format!("api server error: {error}")));

    shutdown.cancel();
    background.join().await;

    served
}
