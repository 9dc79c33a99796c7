//! Console notifier for development. Logs access request notifications.

use async_trait::async_trait;
use nada_application::{AccessRequestNotification, AccessRequestNotifier};
use nada_core::AppResult;
use tracing::info;

use crate::slack_access_request_notifier::access_request_message;

/// Development notifier that logs notifications to the console.
#[derive(Clone)]
pub struct ConsoleAccessRequestNotifier {
    frontend_url: String,
}

impl ConsoleAccessRequestNotifier {
    /// Creates a new console notifier.
    #[must_use]
    pub fn new(frontend_url: impl Into<String>) -> Self {
        Self {
            frontend_url: frontend_url.into(),
        }
    }
}

#[async_trait]
impl AccessRequestNotifier for ConsoleAccessRequestNotifier {
    async fn notify_access_request(
        &self,
        notification: AccessRequestNotification,
    ) -> AppResult<()> {
        info!(
            channel = notification.team_contact.as_deref().unwrap_or("<none>"),
            request_id = %notification.request.id,
            "--- SLACK (console) ---\n{}\n--- END SLACK ---",
            access_request_message(&notification, self.frontend_url.as_str())
        );

        Ok(())
    }
}
