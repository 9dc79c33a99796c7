mod clients;
mod database;
mod leader;
mod state_builder;

pub use database::connect_and_migrate;
pub use state_builder::{AppRuntime, build_app_runtime};
