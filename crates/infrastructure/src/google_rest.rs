//! Authenticated JSON calls against Google Cloud REST APIs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nada_core::{AppError, AppResult};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: i64,
}

enum TokenSource {
    Static(String),
    MetadataServer(RwLock<Option<CachedToken>>),
}

/// Source of OAuth2 bearer tokens for Google APIs.
pub struct GcpTokenProvider {
    source: TokenSource,
}

impl GcpTokenProvider {
    /// Uses a fixed bearer token, e.g. from `gcloud auth print-access-token`.
    #[must_use]
    pub fn from_static(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
        }
    }

    /// Fetches and caches workload identity tokens from the metadata server.
    #[must_use]
    pub fn metadata_server() -> Self {
        Self {
            source: TokenSource::MetadataServer(RwLock::new(None)),
        }
    }

    async fn access_token(&self, http_client: &reqwest::Client) -> AppResult<String> {
        let cache = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::MetadataServer(cache) => cache,
        };

        if let Some(cached) = cache.read().await.as_ref()
            && cached.expires_at > Utc::now()
        {
            return Ok(cached.access_token.clone());
        }

        let response = http_client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|error| AppError::Io(format!("metadata server transport error: {error}")))?
            .error_for_status()
            .map_err(|error| AppError::Io(format!("metadata server token request: {error}")))?
            .json::<MetadataTokenResponse>()
            .await
            .map_err(|error| AppError::Io(format!("invalid metadata server token: {error}")))?;

        let lifetime = (response.expires_in - TOKEN_REFRESH_MARGIN_SECONDS).max(0);
        let token = CachedToken {
            access_token: response.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
        };
        debug!(expires_at = %token.expires_at, "refreshed gcp access token");
        *cache.write().await = Some(token.clone());

        Ok(token.access_token)
    }
}

/// JSON client shared by the BigQuery and IAM adapters.
#[derive(Clone)]
pub struct GoogleRestClient {
    http_client: reqwest::Client,
    tokens: Arc<GcpTokenProvider>,
    max_attempts: u8,
    retry_backoff_ms: u64,
}

impl GoogleRestClient {
    /// Creates a client retrying transient failures `max_attempts` times.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        tokens: Arc<GcpTokenProvider>,
        max_attempts: u8,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            http_client,
            tokens,
            max_attempts: max_attempts.max(1),
            retry_backoff_ms: retry_backoff_ms.max(50),
        }
    }

    /// Calls `url` and returns its JSON body.
    ///
    /// A status listed in `tolerated` yields `Ok(None)`; 404 otherwise maps
    /// to `NotExist` and every other failure to `Io`.
    pub(crate) async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        tolerated: &[StatusCode],
    ) -> AppResult<Option<Value>> {
        let mut attempt = 0_u8;
        let mut last_error: Option<String> = None;

        while attempt < self.max_attempts {
            attempt = attempt.saturating_add(1);
            let token = self.tokens.access_token(&self.http_client).await?;
            let mut builder = self
                .http_client
                .request(method.clone(), url)
                .bearer_auth(token);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) if tolerated.contains(&response.status()) => return Ok(None),
                Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                    return Ok(Some(Value::Null));
                }
                Ok(response) if response.status().is_success() => {
                    let text = response.text().await.map_err(|error| {
                        AppError::Io(format!("failed to read {method} {url} response: {error}"))
                    })?;
                    if text.trim().is_empty() {
                        return Ok(Some(Value::Null));
                    }
                    return serde_json::from_str(text.as_str()).map(Some).map_err(|error| {
                        AppError::Io(format!("invalid {method} {url} response: {error}"))
                    });
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(AppError::NotExist(format!("google resource {url}")));
                }
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == StatusCode::TOO_MANY_REQUESTS =>
                {
                    last_error = Some(format!(
                        "transient HTTP status {} for {method} {url}",
                        response.status()
                    ));
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
                    return Err(AppError::Io(format!(
                        "{method} {url} failed with status {status}: {body}"
                    )));
                }
                Err(error) => {
                    last_error = Some(format!("{method} {url} transport error: {error}"));
                }
            }

            if attempt < self.max_attempts {
                let delay = self.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(AppError::Io(
            last_error.unwrap_or_else(|| format!("{method} {url} exhausted retries")),
        ))
    }

    /// Calls `url` and decodes the JSON body into `T`.
    pub(crate) async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> AppResult<T> {
        let value = self.call(method.clone(), url, body, &[]).await?.unwrap_or_default();
        serde_json::from_value(value)
            .map_err(|error| AppError::Io(format!("unexpected {method} {url} response: {error}")))
    }
}

/// IAM policy of a table or project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IamPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) etag: Option<String>,
    #[serde(default)]
    pub(crate) bindings: Vec<IamBinding>,
}

/// Members holding one role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct IamBinding {
    pub(crate) role: String,
    #[serde(default)]
    pub(crate) members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) condition: Option<Value>,
}

impl IamPolicy {
    /// Adds `member` to the unconditional binding of `role`; returns whether
    /// the policy changed.
    pub(crate) fn add_member(&mut self, role: &str, member: &str) -> bool {
        let binding = self
            .bindings
            .iter_mut()
            .find(|binding| binding.role == role && binding.condition.is_none());

        match binding {
            Some(binding) if binding.members.iter().any(|existing| existing == member) => false,
            Some(binding) => {
                binding.members.push(member.to_owned());
                true
            }
            None => {
                self.bindings.push(IamBinding {
                    role: role.to_owned(),
                    members: vec![member.to_owned()],
                    condition: None,
                });
                true
            }
        }
    }

    /// Removes `member` from every binding of `role`, or of every role when
    /// `role` is `None`; returns whether the policy changed.
    pub(crate) fn remove_member(&mut self, role: Option<&str>, member: &str) -> bool {
        let mut changed = false;
        for binding in &mut self.bindings {
            if role.is_some_and(|role| binding.role != role) {
                continue;
            }
            let before = binding.members.len();
            binding.members.retain(|existing| existing != member);
            changed |= binding.members.len() != before;
        }
        self.bindings.retain(|binding| !binding.members.is_empty());

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::IamPolicy;

    const VIEWER: &str = "roles/bigquery.dataViewer";

    #[test]
    fn adding_a_member_twice_changes_the_policy_once() {
        let mut policy = IamPolicy::default();

        assert!(policy.add_member(VIEWER, "user:ola.utenfor@nav.no"));
        assert!(!policy.add_member(VIEWER, "user:ola.utenfor@nav.no"));
        assert!(policy.add_member(VIEWER, "group:team@nav.no"));

        assert_eq!(policy.bindings.len(), 1);
        assert_eq!(policy.bindings[0].members.len(), 2);
    }

    #[test]
    fn removing_the_last_member_drops_the_binding() {
        let mut policy = IamPolicy::default();
        policy.add_member(VIEWER, "user:ola.utenfor@nav.no");
        policy.add_member("roles/owner", "user:ola.utenfor@nav.no");

        assert!(policy.remove_member(Some(VIEWER), "user:ola.utenfor@nav.no"));
        assert!(!policy.remove_member(Some(VIEWER), "user:ola.utenfor@nav.no"));
        assert_eq!(policy.bindings.len(), 1);

        assert!(policy.remove_member(None, "user:ola.utenfor@nav.no"));
        assert!(policy.bindings.is_empty());
    }

    #[test]
    fn conditional_bindings_are_left_alone_when_adding() {
        let mut policy: IamPolicy = serde_json::from_value(serde_json::json!({
            "version": 3,
            "etag": "BwX",
            "bindings": [{
                "role": VIEWER,
                "members": ["user:kari@nav.no"],
                "condition": { "expression": "request.time < timestamp('2030-01-01T00:00:00Z')" },
            }],
        }))
        .unwrap_or_else(|error| panic!("{error}"));

        assert!(policy.add_member(VIEWER, "user:ola.utenfor@nav.no"));
        assert_eq!(policy.bindings.len(), 2);
        assert_eq!(policy.etag.as_deref(), Some("BwX"));
    }
}
