//! Leader election through a sidecar reporting the elected pod.

use async_trait::async_trait;
use nada_application::LeaderElector;
use nada_core::{AppError, AppResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ElectedLeader {
    name: String,
}

/// Asks the leader election sidecar which pod leads and compares it to the
/// local hostname.
#[derive(Clone)]
pub struct HttpLeaderElector {
    http_client: reqwest::Client,
    endpoint: String,
    hostname: String,
}

impl HttpLeaderElector {
    /// Creates an elector for this host.
    pub fn new(http_client: reqwest::Client, endpoint: impl Into<String>) -> AppResult<Self> {
        let hostname = hostname::get()
            .map_err(|error| AppError::Internal(format!("failed to read hostname: {error}")))?
            .to_string_lossy()
            .into_owned();

        Ok(Self::with_hostname(http_client, endpoint, hostname))
    }

    /// Creates an elector for an explicit hostname.
    #[must_use]
    pub fn with_hostname(
        http_client: reqwest::Client,
        endpoint: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
            hostname: hostname.into(),
        }
    }
}

#[async_trait]
impl LeaderElector for HttpLeaderElector {
    async fn is_leader(&self) -> AppResult<bool> {
        let leader = self
            .http_client
            .get(self.endpoint.as_str())
            .send()
            .await
            .map_err(|error| AppError::Io(format!("leader election transport error: {error}")))?
            .error_for_status()
            .map_err(|error| AppError::Io(format!("leader election request failed: {error}")))?
            .json::<ElectedLeader>()
            .await
            .map_err(|error| AppError::Io(format!("invalid leader election response: {error}")))?;

        Ok(leader.name == self.hostname)
    }
}

/// Elector for single-replica deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLeader;

#[async_trait]
impl LeaderElector for AlwaysLeader {
    async fn is_leader(&self) -> AppResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use nada_application::LeaderElector;
    use nada_core::AppError;

    use super::HttpLeaderElector;

    const THIS_HOST: &str = "nada-backend-7f9c-abcde";

    /// Serves `router` on an ephemeral local port and returns its base url.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|error| panic!("{error}"));
        let address = listener
            .local_addr()
            .unwrap_or_else(|error| panic!("{error}"));
        tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .unwrap_or_else(|error| panic!("{error}"));
        });
        format!("http://{address}")
    }

    async fn sidecar_reporting(name: &'static str) -> String {
        serve(Router::new().route(
            "/",
            get(move || async move { Json(serde_json::json!({ "name": name })) }),
        ))
        .await
    }

    fn elector_on_this_host(endpoint: String) -> HttpLeaderElector {
        HttpLeaderElector::with_hostname(reqwest::Client::new(), endpoint, THIS_HOST)
    }

    #[tokio::test]
    async fn leads_when_the_elected_pod_is_this_host() {
        let endpoint = sidecar_reporting(THIS_HOST).await;
        let elector = elector_on_this_host(endpoint);

        let is_leader = elector
            .is_leader()
            .await
            .unwrap_or_else(|error| panic!("{error}"));

        assert!(is_leader);
    }

    #[tokio::test]
    async fn follows_when_another_pod_is_elected() {
        let endpoint = sidecar_reporting("nada-backend-7f9c-fghij").await;
        let elector = elector_on_this_host(endpoint);

        let is_leader = elector
            .is_leader()
            .await
            .unwrap_or_else(|error| panic!("{error}"));

        assert!(!is_leader);
    }

    #[tokio::test]
    async fn failing_sidecar_is_an_io_error() {
        let endpoint = serve(Router::new().route(
            "/",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "election in progress") }),
        ))
        .await;
        let elector = elector_on_this_host(endpoint);

        let result = elector.is_leader().await;

        assert!(matches!(result, Err(AppError::Io(_))));
    }
}
