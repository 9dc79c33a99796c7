//! Service account lifecycle over the IAM and Resource Manager REST APIs.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nada_application::{ServiceAccountApi, ServiceAccountRequest, ServiceAccountWithPrivateKey};
use nada_core::{AppError, AppResult, ResultExt};
use nada_domain::service_account_email;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::google_rest::{GoogleRestClient, IamPolicy};

const IAM_API: &str = "https://iam.googleapis.com/v1";
const RESOURCE_MANAGER_API: &str = "https://cloudresourcemanager.googleapis.com/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccountKey {
    name: String,
    #[serde(default)]
    private_key_data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KeyListing {
    #[serde(default)]
    keys: Vec<ServiceAccountKey>,
}

/// IAM adapter for the per-dataset Metabase service accounts.
#[derive(Clone)]
pub struct IamServiceAccountClient {
    client: GoogleRestClient,
}

impl IamServiceAccountClient {
    /// Creates a client over an authenticated Google REST client.
    #[must_use]
    pub fn new(client: GoogleRestClient) -> Self {
        Self { client }
    }

    async fn ensure_account(&self, request: &ServiceAccountRequest, email: &str) -> AppResult<()> {
        let existing = self
            .client
            .call(
                Method::GET,
                format!("{IAM_API}/projects/{}/serviceAccounts/{email}", request.project_id)
                    .as_str(),
                None,
                &[StatusCode::NOT_FOUND],
            )
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        self.client
            .call(
                Method::POST,
                format!("{IAM_API}/projects/{}/serviceAccounts", request.project_id).as_str(),
                Some(&json!({
                    "accountId": request.account_id,
                    "serviceAccount": {
                        "displayName": request.display_name,
                        "description": request.description,
                    },
                })),
                &[StatusCode::CONFLICT],
            )
            .await?;
        info!(sa_email = email, "created service account");

        Ok(())
    }

    async fn update_project_policy(
        &self,
        project_id: &str,
        update: impl FnOnce(&mut IamPolicy) -> bool + Send,
    ) -> AppResult<()> {
        let mut policy: IamPolicy = self
            .client
            .call_json(
                Method::POST,
                format!("{RESOURCE_MANAGER_API}/projects/{project_id}:getIamPolicy").as_str(),
                Some(&json!({})),
            )
            .await?;
        if !update(&mut policy) {
            return Ok(());
        }

        let policy = serde_json::to_value(&policy)
            .map_err(|error| AppError::Internal(format!("failed to encode iam policy: {error}")))?;
        self.client
            .call(
                Method::POST,
                format!("{RESOURCE_MANAGER_API}/projects/{project_id}:setIamPolicy").as_str(),
                Some(&json!({ "policy": policy })),
                &[],
            )
            .await
            .map(|_| ())
    }

    /// Deletes every user managed key and creates a fresh one.
    async fn rotate_key(&self, project_id: &str, email: &str) -> AppResult<String> {
        let keys_url = format!("{IAM_API}/projects/{project_id}/serviceAccounts/{email}/keys");
        let listing: KeyListing = self
            .client
            .call_json(
                Method::GET,
                format!("{keys_url}?keyTypes=USER_MANAGED").as_str(),
                None,
            )
            .await?;

        for key in listing.keys {
            self.client
                .call(
                    Method::DELETE,
                    format!("{IAM_API}/{}", key.name).as_str(),
                    None,
                    &[StatusCode::NOT_FOUND],
                )
                .await?;
        }

        let created: ServiceAccountKey = self
            .client
            .call_json(Method::POST, keys_url.as_str(), Some(&json!({})))
            .await?;
        let encoded = created.private_key_data.ok_or_else(|| {
            AppError::Io(format!("created key '{}' carries no private key data", created.name))
        })?;
        let decoded = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|error| {
                AppError::Io(format!("invalid service account key encoding: {error}"))
            })?;

        String::from_utf8(decoded)
            .map_err(|error| AppError::Io(format!("service account key is not utf-8: {error}")))
    }
}

#[async_trait]
impl ServiceAccountApi for IamServiceAccountClient {
    async fn ensure_service_account_with_key_and_binding(
        &self,
        request: &ServiceAccountRequest,
    ) -> AppResult<ServiceAccountWithPrivateKey> {
        let email = service_account_email(request.account_id.as_str(), request.project_id.as_str());

        self.ensure_account(request, email.as_str())
            .await
            .op("iam.ensure_service_account")?;

        let member = format!("serviceAccount:{email}");
        let role = request.binding.role.as_str();
        self.update_project_policy(request.binding.project_id.as_str(), |policy| {
            policy.add_member(role, member.as_str())
        })
        .await
        .op("iam.ensure_service_account_binding")?;

        let key_json = self
            .rotate_key(request.project_id.as_str(), email.as_str())
            .await
            .op("iam.rotate_service_account_key")?;

        Ok(ServiceAccountWithPrivateKey { email, key_json })
    }

    async fn delete_service_account_and_bindings(
        &self,
        project_id: &str,
        email: &str,
    ) -> AppResult<()> {
        let member = format!("serviceAccount:{email}");
        self.update_project_policy(project_id, |policy| {
            policy.remove_member(None, member.as_str())
        })
        .await
        .op("iam.delete_service_account_bindings")?;

        let deleted = self
            .client
            .call(
                Method::DELETE,
                format!("{IAM_API}/projects/{project_id}/serviceAccounts/{email}").as_str(),
                None,
                &[StatusCode::NOT_FOUND],
            )
            .await
            .op("iam.delete_service_account")?;
        if deleted.is_none() {
            warn!(sa_email = email, "service account was already deleted");
        }

        Ok(())
    }
}
