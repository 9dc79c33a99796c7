//! BigQuery access control over the BigQuery v2 REST API.

use async_trait::async_trait;
use nada_application::{BigQueryApi, PseudonymisedView};
use nada_core::{AppError, AppResult, ResultExt};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use tracing::info;

use crate::google_rest::{GoogleRestClient, IamPolicy};

const BIGQUERY_API: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DATA_VIEWER_ROLE: &str = "roles/bigquery.dataViewer";

/// Dataset hosting pseudonymised views in each source project.
pub const PSEUDO_VIEWS_DATASET: &str = "markedsplassen_pseudo";

/// BigQuery adapter granting table level read access.
#[derive(Clone)]
pub struct BigQueryRestClient {
    client: GoogleRestClient,
    location: String,
}

impl BigQueryRestClient {
    /// Creates a client; `location` is used for datasets it creates.
    #[must_use]
    pub fn new(client: GoogleRestClient, location: impl Into<String>) -> Self {
        Self {
            client,
            location: location.into(),
        }
    }

    fn table_url(project_id: &str, dataset: &str, table: &str) -> String {
        format!("{BIGQUERY_API}/projects/{project_id}/datasets/{dataset}/tables/{table}")
    }

    async fn table_policy(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
    ) -> AppResult<IamPolicy> {
        self.client
            .call_json(
                Method::POST,
                format!("{}:getIamPolicy", Self::table_url(project_id, dataset, table)).as_str(),
                Some(&json!({})),
            )
            .await
    }

    async fn set_table_policy(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        policy: &IamPolicy,
    ) -> AppResult<()> {
        let policy = serde_json::to_value(policy)
            .map_err(|error| AppError::Internal(format!("failed to encode iam policy: {error}")))?;
        self.client
            .call(
                Method::POST,
                format!("{}:setIamPolicy", Self::table_url(project_id, dataset, table)).as_str(),
                Some(&json!({ "policy": policy })),
                &[],
            )
            .await
            .map(|_| ())
    }

    async fn ensure_dataset(&self, project_id: &str, dataset: &str) -> AppResult<()> {
        self.client
            .call(
                Method::POST,
                format!("{BIGQUERY_API}/projects/{project_id}/datasets").as_str(),
                Some(&json!({
                    "datasetReference": { "projectId": project_id, "datasetId": dataset },
                    "location": self.location,
                })),
                &[StatusCode::CONFLICT],
            )
            .await
            .map(|_| ())
    }
}

/// Query of a view replacing every pseudo column by its SHA-256 hash.
fn pseudonymised_view_query(
    project_id: &str,
    dataset: &str,
    table: &str,
    pseudo_columns: &[String],
) -> String {
    let replacements = pseudo_columns
        .iter()
        .map(|column| format!("TO_HEX(SHA256(CAST(`{column}` AS STRING))) AS `{column}`"))
        .collect::<Vec<_>>()
        .join(", ");

    format!("SELECT * REPLACE ({replacements}) FROM `{project_id}.{dataset}.{table}`")
}

fn pseudonymised_view_name(dataset: &str, table: &str) -> String {
    format!("{dataset}_{table}")
}

#[async_trait]
impl BigQueryApi for BigQueryRestClient {
    async fn grant(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        member: &str,
    ) -> AppResult<()> {
        let mut policy = self
            .table_policy(project_id, dataset, table)
            .await
            .op("bigquery.grant")?;
        if !policy.add_member(DATA_VIEWER_ROLE, member) {
            return Ok(());
        }

        self.set_table_policy(project_id, dataset, table, &policy)
            .await
            .op("bigquery.grant")?;
        info!(project_id, dataset, table, member, "granted bigquery table access");
        Ok(())
    }

    async fn revoke(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        member: &str,
    ) -> AppResult<()> {
        let mut policy = self
            .table_policy(project_id, dataset, table)
            .await
            .op("bigquery.revoke")?;
        if !policy.remove_member(Some(DATA_VIEWER_ROLE), member) {
            return Ok(());
        }

        self.set_table_policy(project_id, dataset, table, &policy)
            .await
            .op("bigquery.revoke")?;
        info!(project_id, dataset, table, member, "revoked bigquery table access");
        Ok(())
    }

    async fn add_to_authorized_views(
        &self,
        source_project_id: &str,
        source_dataset: &str,
        view_project_id: &str,
        view_dataset: &str,
        view_table: &str,
    ) -> AppResult<()> {
        let url = format!("{BIGQUERY_API}/projects/{source_project_id}/datasets/{source_dataset}");
        let metadata: Value = self
            .client
            .call_json(Method::GET, url.as_str(), None)
            .await
            .op("bigquery.add_to_authorized_views")?;

        let view = json!({
            "projectId": view_project_id,
            "datasetId": view_dataset,
            "tableId": view_table,
        });
        let mut access = metadata
            .get("access")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if access.iter().any(|entry| entry.get("view") == Some(&view)) {
            return Ok(());
        }
        access.push(json!({ "view": view }));

        self.client
            .call(
                Method::PATCH,
                url.as_str(),
                Some(&json!({ "access": access })),
                &[],
            )
            .await
            .op("bigquery.add_to_authorized_views")?;
        Ok(())
    }

    async fn create_pseudonymised_view(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        pseudo_columns: &[String],
    ) -> AppResult<PseudonymisedView> {
        if pseudo_columns.is_empty() {
            return Err(AppError::InvalidRequest(
                "a pseudonymised view needs at least one pseudo column".to_owned(),
            ));
        }

        self.ensure_dataset(project_id, PSEUDO_VIEWS_DATASET)
            .await
            .op("bigquery.create_pseudonymised_view")?;

        let view_name = pseudonymised_view_name(dataset, table);
        let definition = json!({
            "tableReference": {
                "projectId": project_id,
                "datasetId": PSEUDO_VIEWS_DATASET,
                "tableId": view_name,
            },
            "view": {
                "query": pseudonymised_view_query(project_id, dataset, table, pseudo_columns),
                "useLegacySql": false,
            },
        });

        let tables_url =
            format!("{BIGQUERY_API}/projects/{project_id}/datasets/{PSEUDO_VIEWS_DATASET}/tables");
        let created = self
            .client
            .call(
                Method::POST,
                tables_url.as_str(),
                Some(&definition),
                &[StatusCode::CONFLICT],
            )
            .await
            .op("bigquery.create_pseudonymised_view")?;
        if created.is_none() {
            // Existing view: replace its query with the current column set.
            self.client
                .call(
                    Method::PUT,
                    Self::table_url(project_id, PSEUDO_VIEWS_DATASET, view_name.as_str()).as_str(),
                    Some(&definition),
                    &[],
                )
                .await
                .op("bigquery.create_pseudonymised_view")?;
        }

        self.add_to_authorized_views(
            project_id,
            dataset,
            project_id,
            PSEUDO_VIEWS_DATASET,
            view_name.as_str(),
        )
        .await?;

        Ok(PseudonymisedView {
            project_id: project_id.to_owned(),
            dataset: PSEUDO_VIEWS_DATASET.to_owned(),
            table: view_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{pseudonymised_view_name, pseudonymised_view_query};

    #[test]
    fn view_query_hashes_only_pseudo_columns() {
        let query = pseudonymised_view_query(
            "team-sykefravaer-prod",
            "fravaer",
            "fravaer_maaned",
            &["fnr".to_owned(), "orgnr".to_owned()],
        );

        assert!(query.starts_with("SELECT * REPLACE (TO_HEX(SHA256(CAST(`fnr` AS STRING)))"));
        assert!(query.contains("AS `orgnr`"));
        assert!(query.ends_with("FROM `team-sykefravaer-prod.fravaer.fravaer_maaned`"));
    }

    #[test]
    fn view_name_keeps_dataset_and_table_apart() {
        assert_eq!(pseudonymised_view_name("fravaer", "maaned"), "fravaer_maaned");
    }
}
