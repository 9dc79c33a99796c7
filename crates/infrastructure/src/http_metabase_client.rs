//! Session-authenticated Metabase REST client.

use std::time::Duration;

use async_trait::async_trait;
use nada_application::{
    MetabaseApi, MetabaseCollection, MetabaseTable, NewMetabaseDatabase, PermissionGroupMember,
};
use nada_core::{AppError, AppResult};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, warn};

mod graph;


use graph::{
    PermissionGraph, collection_no_access, collection_write_access, database_data_access,
    database_no_access,
};

const SESSION_HEADER: &str = "X-Metabase-Session";

/// Group every Metabase user is a member of.
pub const METABASE_ALL_USERS_GROUP_ID: i64 = 1;

/// Connection settings for [`HttpMetabaseClient`].
#[derive(Debug, Clone)]
pub struct MetabaseClientConfig {
    /// Base URL, e.g. `https://metabase.intern.nav.no`.
    pub base_url: String,
    /// Username of the service user.
    pub username: String,
    /// Password of the service user.
    pub password: String,
    /// Attempts for transient failures.
    pub max_attempts: u8,
    /// Linear backoff between attempts.
    pub retry_backoff_ms: u64,
}

/// Metabase adapter over its REST API.
pub struct HttpMetabaseClient {
    http_client: reqwest::Client,
    config: MetabaseClientConfig,
    session: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct NamedGroup {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GroupDetails {
    #[serde(default)]
    members: Vec<PermissionGroupMember>,
}

#[derive(Debug, Deserialize)]
struct DatabaseMetadata {
    #[serde(default)]
    tables: Vec<MetabaseTable>,
}

#[derive(Debug, Deserialize)]
struct CollectionListing {
    id: Value,
    name: String,
    description: Option<String>,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct UserListing {
    #[serde(default)]
    data: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    id: i64,
    email: String,
}

impl HttpMetabaseClient {
    /// Creates a client; the session is established on first use.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: MetabaseClientConfig) -> Self {
        let config = MetabaseClientConfig {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            max_attempts: config.max_attempts.max(1),
            retry_backoff_ms: config.retry_backoff_ms.max(50),
            ..config
        };

        Self {
            http_client,
            config,
            session: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    async fn login(&self) -> AppResult<String> {
        let response = self
            .http_client
            .post(self.url("/api/session"))
            .json(&json!({
                "username": self.config.username,
                "password": self.config.password,
            }))
            .send()
            .await
            .map_err(|error| AppError::Io(format!("metabase login transport error: {error}")))?;

        if !response.status().is_success() {
            return Err(AppError::Io(format!(
                "metabase login failed with status {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct Session {
            id: String,
        }

        let session = response
            .json::<Session>()
            .await
            .map_err(|error| AppError::Io(format!("invalid metabase session response: {error}")))?;

        debug!("established metabase session");
        *self.session.write().await = Some(session.id.clone());
        Ok(session.id)
    }

    async fn session_token(&self) -> AppResult<String> {
        if let Some(token) = self.session.read().await.clone() {
            return Ok(token);
        }

        self.login().await
    }

    /// Sends one request, renewing an expired session once and retrying
    /// transient statuses.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> AppResult<reqwest::Response> {
        let url = self.url(path);
        let mut attempt = 0_u8;
        let mut renewed_session = false;
        let mut last_error: Option<String> = None;

        while attempt < self.config.max_attempts {
            attempt = attempt.saturating_add(1);
            let token = self.session_token().await?;
            let mut builder = self
                .http_client
                .request(method.clone(), url.as_str())
                .header(SESSION_HEADER, token.as_str());
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if response.status() == StatusCode::UNAUTHORIZED && !renewed_session =>
                {
                    renewed_session = true;
                    attempt = attempt.saturating_sub(1);
                    *self.session.write().await = None;
                    continue;
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(AppError::NotExist(format!("metabase resource {method} {path}")));
                }
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == StatusCode::TOO_MANY_REQUESTS =>
                {
                    last_error = Some(format!(
                        "transient HTTP status {} for metabase {method} {path}",
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
                        "metabase {method} {path} failed with status {status}: {body}"
                    )));
                }
                Err(error) => {
                    last_error = Some(format!("metabase {method} {path} transport error: {error}"));
                }
            }

            if attempt < self.config.max_attempts {
                let delay = self.config.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(AppError::Io(last_error.unwrap_or_else(|| {
            format!("metabase {method} {path} exhausted retries")
        })))
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> AppResult<T> {
        self.send(method.clone(), path, body)
            .await?
            .json::<T>()
            .await
            .map_err(|error| {
                AppError::Io(format!("invalid metabase {method} {path} response: {error}"))
            })
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> AppResult<()> {
        self.send(method, path, body).await.map(|_| ())
    }

    async fn set_tables_visibility(&self, table_ids: &[i64], visibility: Value) -> AppResult<()> {
        if table_ids.is_empty() {
            return Ok(());
        }

        self.request(
            Method::PUT,
            "/api/table",
            Some(&json!({ "ids": table_ids, "visibility_type": visibility })),
        )
        .await
    }

    async fn user_id(&self, email: &str) -> AppResult<i64> {
        let mut url = reqwest::Url::parse(self.url("/api/user").as_str())
            .map_err(|error| AppError::Internal(format!("invalid metabase url: {error}")))?;
        url.query_pairs_mut().append_pair("query", email);
        let path = format!("/api/user?{}", url.query().unwrap_or_default());

        let users: UserListing = self.request_json(Method::GET, path.as_str(), None).await?;

        users
            .data
            .into_iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .map(|user| user.id)
            .ok_or_else(|| AppError::NotExist(format!("metabase user '{email}'")))
    }

    async fn update_database_graph(
        &self,
        update: impl FnOnce(&mut PermissionGraph) -> AppResult<()>,
    ) -> AppResult<()> {
        let mut graph = PermissionGraph::new(
            self.request_json(Method::GET, "/api/permissions/graph", None)
                .await?,
        );
        update(&mut graph)?;
        self.request(Method::PUT, "/api/permissions/graph", Some(graph.as_value()))
            .await
    }
}

/// Display name of a database connection, prefixed by the owning team.
fn database_display_name(database: &NewMetabaseDatabase) -> String {
    match database.team.as_deref() {
        Some(team) if !team.is_empty() => format!("{team}: {}", database.name),
        _ => database.name.clone(),
    }
}

fn database_payload(database: &NewMetabaseDatabase) -> Value {
    json!({
        "engine": "bigquery-cloud-sdk",
        "name": database_display_name(database),
        "is_full_sync": true,
        "is_on_demand": false,
        "auto_run_queries": true,
        "details": {
            "project-id": database.project_id,
            "service-account-json": database.sa_key_json,
            "dataset-filters-type": "inclusion",
            "dataset-filters-patterns": database.dataset,
            "include-user-id-and-hash": true,
        },
    })
}

#[async_trait]
impl MetabaseApi for HttpMetabaseClient {
    async fn create_database(&self, database: &NewMetabaseDatabase) -> AppResult<i64> {
        let created: IdResponse = self
            .request_json(Method::POST, "/api/database", Some(&database_payload(database)))
            .await?;

        debug!(
            database_id = created.id,
            sa_email = %database.sa_email,
            "created metabase database"
        );
        Ok(created.id)
    }

    async fn delete_database(&self, database_id: i64) -> AppResult<()> {
        self.request(Method::DELETE, format!("/api/database/{database_id}").as_str(), None)
            .await
    }

    async fn tables(&self, database_id: i64) -> AppResult<Vec<MetabaseTable>> {
        let metadata: DatabaseMetadata = self
            .request_json(
                Method::GET,
                format!("/api/database/{database_id}/metadata?include_hidden=true").as_str(),
                None,
            )
            .await?;

        Ok(metadata.tables)
    }

    async fn hide_tables(&self, table_ids: &[i64]) -> AppResult<()> {
        self.set_tables_visibility(table_ids, json!("hidden")).await
    }

    async fn show_tables(&self, table_ids: &[i64]) -> AppResult<()> {
        self.set_tables_visibility(table_ids, Value::Null).await
    }

    async fn map_semantic_type(&self, field_id: i64, semantic_type: &str) -> AppResult<()> {
        self.request(
            Method::PUT,
            format!("/api/field/{field_id}").as_str(),
            Some(&json!({ "semantic_type": semantic_type })),
        )
        .await
    }

    async fn get_or_create_permission_group(&self, name: &str) -> AppResult<i64> {
        let groups: Vec<NamedGroup> = self
            .request_json(Method::GET, "/api/permissions/group", None)
            .await?;
        if let Some(group) = groups.into_iter().find(|group| group.name == name) {
            return Ok(group.id);
        }

        let created: IdResponse = self
            .request_json(
                Method::POST,
                "/api/permissions/group",
                Some(&json!({ "name": name })),
            )
            .await?;
        Ok(created.id)
    }

    async fn get_permission_group(&self, group_id: i64) -> AppResult<Vec<PermissionGroupMember>> {
        let group: GroupDetails = self
            .request_json(
                Method::GET,
                format!("/api/permissions/group/{group_id}").as_str(),
                None,
            )
            .await?;

        Ok(group.members)
    }

    async fn add_permission_group_member(&self, group_id: i64, email: &str) -> AppResult<()> {
        let members = self.get_permission_group(group_id).await?;
        if members
            .iter()
            .any(|member| member.email.eq_ignore_ascii_case(email))
        {
            return Ok(());
        }

        let user_id = self.user_id(email).await?;
        self.request(
            Method::POST,
            "/api/permissions/membership",
            Some(&json!({ "group_id": group_id, "user_id": user_id })),
        )
        .await
    }

    async fn remove_permission_group_member(&self, membership_id: i64) -> AppResult<()> {
        self.request(
            Method::DELETE,
            format!("/api/permissions/membership/{membership_id}").as_str(),
            None,
        )
        .await
    }

    async fn delete_permission_group(&self, group_id: i64) -> AppResult<()> {
        self.request(
            Method::DELETE,
            format!("/api/permissions/group/{group_id}").as_str(),
            None,
        )
        .await
    }

    async fn restrict_access_to_database(
        &self,
        group_ids: &[i64],
        database_id: i64,
    ) -> AppResult<()> {
        self.update_database_graph(|graph| {
            graph.set(METABASE_ALL_USERS_GROUP_ID, database_id, database_no_access())?;
            for group_id in group_ids {
                graph.set(*group_id, database_id, database_data_access())?;
            }
            Ok(())
        })
        .await
    }

    async fn open_access_to_database(&self, database_id: i64) -> AppResult<()> {
        self.update_database_graph(|graph| {
            graph.set(METABASE_ALL_USERS_GROUP_ID, database_id, database_data_access())
        })
        .await
    }

    async fn create_collection_with_access(
        &self,
        group_id: i64,
        name: &str,
        description: &str,
    ) -> AppResult<i64> {
        let created: IdResponse = self
            .request_json(
                Method::POST,
                "/api/collection",
                Some(&json!({
                    "name": name,
                    "description": description,
                    "color": "#509EE3",
                })),
            )
            .await?;

        let mut graph = PermissionGraph::new(
            self.request_json(Method::GET, "/api/collection/graph", None)
                .await?,
        );
        graph.set(METABASE_ALL_USERS_GROUP_ID, created.id, collection_no_access())?;
        graph.set(group_id, created.id, collection_write_access())?;
        if let Err(error) = self
            .request(Method::PUT, "/api/collection/graph", Some(graph.as_value()))
            .await
        {
            warn!(collection_id = created.id, %error, "collection created without group access");
            return Err(error);
        }

        Ok(created.id)
    }

    async fn archive_collection(&self, collection_id: i64) -> AppResult<()> {
        self.request(
            Method::PUT,
            format!("/api/collection/{collection_id}").as_str(),
            Some(&json!({ "archived": true })),
        )
        .await
    }

    async fn get_collections(&self) -> AppResult<Vec<MetabaseCollection>> {
        let listing: Vec<CollectionListing> = self
            .request_json(Method::GET, "/api/collection", None)
            .await?;

        // The root collection has the id "root".
        Ok(listing
            .into_iter()
            .filter(|collection| !collection.archived)
            .filter_map(|collection| {
                collection.id.as_i64().map(|id| MetabaseCollection {
                    id,
                    name: collection.name,
                    description: collection.description,
                })
            })
            .collect())
    }

    async fn update_collection(&self, collection: &MetabaseCollection) -> AppResult<()> {
        self.request(
            Method::PUT,
            format!("/api/collection/{}", collection.id).as_str(),
            Some(&json!({
                "name": collection.name,
                "description": collection.description,
            })),
        )
        .await
    }
}
