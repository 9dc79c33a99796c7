use std::sync::Arc;
use std::time::Duration;

use nada_application::AccessRequestNotifier;
use nada_core::AppError;
use nada_infrastructure::{
    ConsoleAccessRequestNotifier, GcpTokenProvider, GoogleRestClient, HttpMetabaseClient,
    MetabaseClientConfig, SlackAccessRequestNotifier, SlackNotifierConfig,
};

use crate::api_config::{ApiConfig, NotifierConfig};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u8 = 3;
const RETRY_BACKOFF_MS: u64 = 500;

pub(super) fn build_http_client() -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build http client: {error}")))
}

pub(super) fn build_google_client(
    config: &ApiConfig,
    http_client: reqwest::Client,
) -> GoogleRestClient {
    let tokens = match &config.gcp_access_token {
        Some(token) => GcpTokenProvider::from_static(token.as_str()),
        None => GcpTokenProvider::metadata_server(),
    };

    GoogleRestClient::new(http_client, Arc::new(tokens), MAX_ATTEMPTS, RETRY_BACKOFF_MS)
}

pub(super) fn build_metabase_client(
    config: &ApiConfig,
    http_client: reqwest::Client,
) -> HttpMetabaseClient {
    HttpMetabaseClient::new(
        http_client,
        MetabaseClientConfig {
            base_url: config.metabase.api_url.clone(),
            username: config.metabase.username.clone(),
            password: config.metabase.password.clone(),
            max_attempts: MAX_ATTEMPTS,
            retry_backoff_ms: RETRY_BACKOFF_MS,
        },
    )
}

pub(super) fn build_notifier(
    config: &ApiConfig,
    http_client: reqwest::Client,
) -> Arc<dyn AccessRequestNotifier> {
    match &config.notifier {
        NotifierConfig::Slack { webhook_url } => Arc::new(SlackAccessRequestNotifier::new(
            http_client,
            SlackNotifierConfig {
                webhook_url: webhook_url.clone(),
                frontend_url: config.frontend_url.clone(),
            },
        )),
        NotifierConfig::Console => {
            Arc::new(ConsoleAccessRequestNotifier::new(config.frontend_url.as_str()))
        }
    }
}
