use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use nada_application::{DatabasePollConfig, MetabaseMapperConfig};
use nada_core::AppError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct MetabaseRuntimeConfig {
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub sa_email: String,
    pub sa_key: String,
    pub custom_role: String,
    pub mapper: MetabaseMapperConfig,
    pub collections_sync_interval: Duration,
    pub database_poll: DatabasePollConfig,
}

#[derive(Debug, Clone)]
pub enum LeaderElectionConfig {
    Sidecar { endpoint: String },
    Redis { redis_url: String },
    Always,
}

#[derive(Debug, Clone)]
pub enum NotifierConfig {
    Console,
    Slack { webhook_url: String },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub migrate_only: bool,
    pub database_url: String,
    pub frontend_url: String,
    pub api_host: String,
    pub api_port: u16,
    pub gcp_project_id: String,
    pub bigquery_location: String,
    pub all_users_group: String,
    pub operator_group: String,
    pub gcp_access_token: Option<String>,
    pub metabase: MetabaseRuntimeConfig,
    pub leader_election: LeaderElectionConfig,
    pub notifier: NotifierConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

        let database_url = required_env("DATABASE_URL")?;
        let frontend_url =
            env::var("NADA_FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_owned());
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let api_port = parsed_env("API_PORT", 8080_u16)?;

        let gcp_project_id = required_non_empty_env("NADA_GCP_PROJECT_ID")?;
        let bigquery_location =
            env::var("BIGQUERY_LOCATION").unwrap_or_else(|_| "europe-north1".to_owned());
        let all_users_group = env::var("NADA_ALL_USERS_GROUP")
            .unwrap_or_else(|_| "all-users@nav.no".to_owned())
            .to_lowercase();
        let operator_group = env::var("NADA_OPERATOR_GROUP")
            .unwrap_or_else(|_| "nada@nav.no".to_owned())
            .to_lowercase();
        let gcp_access_token = optional_env("GCP_ACCESS_TOKEN");

        let custom_role = optional_env("METABASE_CUSTOM_ROLE")
            .unwrap_or_else(|| default_custom_role(gcp_project_id.as_str()));
        let metabase = MetabaseRuntimeConfig {
            api_url: required_non_empty_env("METABASE_API_URL")?,
            username: required_non_empty_env("METABASE_USERNAME")?,
            password: required_non_empty_env("METABASE_PASSWORD")?,
            sa_email: required_non_empty_env("METABASE_SA_EMAIL")?,
            sa_key: required_non_empty_env("METABASE_SA_KEY")?,
            custom_role,
            mapper: MetabaseMapperConfig {
                tick_interval: Duration::from_secs(positive_env(
                    "METABASE_MAPPING_FREQUENCY_SECONDS",
                    60,
                )?),
                mapping_deadline: Duration::from_secs(positive_env(
                    "METABASE_MAPPING_DEADLINE_SECONDS",
                    600,
                )?),
            },
            collections_sync_interval: Duration::from_secs(positive_env(
                "METABASE_COLLECTIONS_SYNC_FREQUENCY_SECONDS",
                3600,
            )?),
            database_poll: DatabasePollConfig {
                attempts: parsed_env("METABASE_DATABASE_POLL_ATTEMPTS", 200_u32)?,
                interval: Duration::from_millis(parsed_env(
                    "METABASE_DATABASE_POLL_INTERVAL_MS",
                    100_u64,
                )?),
            },
        };

        let leader_election = leader_election_from(
            optional_env("LEADER_ELECTION_ENDPOINT"),
            optional_env("REDIS_URL"),
        );
        let notifier = match optional_env("SLACK_WEBHOOK_URL") {
            Some(webhook_url) => NotifierConfig::Slack { webhook_url },
            None => NotifierConfig::Console,
        };

        Ok(Self {
            migrate_only,
            database_url,
            frontend_url,
            api_host,
            api_port,
            gcp_project_id,
            bigquery_location,
            all_users_group,
            operator_group,
            gcp_access_token,
            metabase,
            leader_election,
            notifier,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::InvalidRequest(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn default_custom_role(gcp_project_id: &str) -> String {
    format!("projects/{gcp_project_id}/roles/nada.metabase")
}

/// The sidecar wins over Redis when both are configured.
fn leader_election_from(
    endpoint: Option<String>,
    redis_url: Option<String>,
) -> LeaderElectionConfig {
    match (endpoint, redis_url) {
        (Some(endpoint), _) => LeaderElectionConfig::Sidecar { endpoint },
        (None, Some(redis_url)) => LeaderElectionConfig::Redis { redis_url },
        (None, None) => LeaderElectionConfig::Always,
    }
}

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::InvalidRequest(format!("{name} is required")))
}

fn required_non_empty_env(name: &str) -> Result<String, AppError> {
    let value = required_env(name)?;
    if value.trim().is_empty() {
        return Err(AppError::InvalidRequest(format!("{name} must not be empty")));
    }

    Ok(value)
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_env<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(name, optional_env(name), default)
}

fn positive_env(name: &str, default: u64) -> Result<u64, AppError> {
    let value = parsed_env(name, default)?;
    if value == 0 {
        return Err(AppError::InvalidRequest(format!("{name} must be greater than zero")));
    }

    Ok(value)
}

fn parse_value<T>(name: &str, raw: Option<String>, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|error| AppError::InvalidRequest(format!("invalid {name} '{raw}': {error}"))),
        None => Ok(default),
    }
}
