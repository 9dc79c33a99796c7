//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod bigquery_rest_client;
mod console_access_request_notifier;
mod google_rest;
mod http_leader_elector;
mod http_metabase_client;
mod iam_service_account_client;
mod postgres_access_repository;
mod postgres_dataset_repository;
mod postgres_metabase_repository;
mod redis_leader_elector;
mod slack_access_request_notifier;

#[cfg(test)]
mod postgres_test_support;

pub use bigquery_rest_client::{BigQueryRestClient, PSEUDO_VIEWS_DATASET};
pub use console_access_request_notifier::ConsoleAccessRequestNotifier;
pub use google_rest::{GcpTokenProvider, GoogleRestClient};
pub use http_leader_elector::{AlwaysLeader, HttpLeaderElector};
pub use http_metabase_client::{
    HttpMetabaseClient, METABASE_ALL_USERS_GROUP_ID, MetabaseClientConfig,
};
pub use iam_service_account_client::IamServiceAccountClient;
pub use postgres_access_repository::PostgresAccessRepository;
pub use postgres_dataset_repository::PostgresDatasetRepository;
pub use postgres_metabase_repository::PostgresMetabaseRepository;
pub use redis_leader_elector::RedisLeaderElector;
pub use slack_access_request_notifier::{SlackAccessRequestNotifier, SlackNotifierConfig};
