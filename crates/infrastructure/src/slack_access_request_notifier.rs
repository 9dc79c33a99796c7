//! Slack incoming-webhook notifier for new access requests.

use async_trait::async_trait;
use nada_application::{AccessRequestNotification, AccessRequestNotifier};
use nada_core::{AppError, AppResult};
use serde_json::json;

/// Slack notifier configuration.
#[derive(Debug, Clone)]
pub struct SlackNotifierConfig {
    /// Incoming webhook URL.
    pub webhook_url: String,
    /// Frontend base URL used for links in messages.
    pub frontend_url: String,
}

/// Posts access request notifications to the owning team's channel.
#[derive(Clone)]
pub struct SlackAccessRequestNotifier {
    http_client: reqwest::Client,
    config: SlackNotifierConfig,
}

impl SlackAccessRequestNotifier {
    /// Creates a new Slack notifier.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: SlackNotifierConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }
}

/// Renders the human readable notification text.
pub(crate) fn access_request_message(
    notification: &AccessRequestNotification,
    frontend_url: &str,
) -> String {
    let request = &notification.request;
    format!(
        "{} has requested access to '{}' in dataproduct '{}' on behalf of {}. \
         Review it at {}/dataproduct/access-requests?datasetId={}",
        request.owner,
        notification.dataset_name,
        notification.dataproduct_name,
        request.subject,
        frontend_url.trim_end_matches('/'),
        request.dataset_id,
    )
}

#[async_trait]
impl AccessRequestNotifier for SlackAccessRequestNotifier {
    async fn notify_access_request(
        &self,
        notification: AccessRequestNotification,
    ) -> AppResult<()> {
        // Teams without a contact channel cannot be notified.
        let Some(channel) = notification.team_contact.as_deref() else {
            return Ok(());
        };

        let text = access_request_message(&notification, self.config.frontend_url.as_str());
        let response = self
            .http_client
            .post(self.config.webhook_url.as_str())
            .json(&json!({
                "channel": channel,
                "text": text,
            }))
            .send()
            .await
            .map_err(|error| AppError::Io(format!("slack webhook transport error: {error}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_owned());
            return Err(AppError::Io(format!(
                "slack webhook failed with status {status}: {body}"
            )));
        }

        Ok(())
    }
}
