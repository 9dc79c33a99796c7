use nada_core::{AppError, AppResult};
use nada_domain::{
    DatasetId, METABASE_SERVICE, MetabaseMetadata, PermissionGroup, permission_group_name,
    restricted_collection_name, service_account_id,
};
use tracing::{debug, info, warn};

use super::{MetabaseService, ignore_not_exist};
use crate::gcp_ports::{ServiceAccountBinding, ServiceAccountRequest};
use crate::metabase_ports::NewMetabaseDatabase;

/// BigQuery column types that get a Metabase semantic type on creation.
const SEMANTIC_TYPES: &[(&str, &str)] = &[
    ("STRING", "type/Name"),
    ("TIMESTAMP", "type/CreationTimestamp"),
    ("DATE", "type/CreationDate"),
];

/// Undo step for a failed database creation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Compensation {
    RemoveMetabaseMapping,
    DeleteMetadata,
    DeletePermissionGroup(i64),
    ArchiveCollection(i64),
    DeleteServiceAccount(String),
    RevokeGrant {
        project_id: String,
        dataset: String,
        table: String,
        member: String,
    },
    DeleteDatabase(i64),
}

impl MetabaseService {
    /// Allocates group, collection and service account, in that order, then
    /// creates the database.
    pub(super) async fn create_restricted(&self, meta: MetabaseMetadata) -> AppResult<()> {
        let dataset_id = meta.dataset_id;
        let dataset = self.dataset_repository.get_dataset(dataset_id).await?;

        let group_id = match meta.permission_group.dedicated_id() {
            Some(group_id) => group_id,
            None => {
                let group_id = self
                    .metabase_api
                    .get_or_create_permission_group(permission_group_name(&dataset.name).as_str())
                    .await?;
                self.metabase_repository
                    .set_permission_group(dataset_id, PermissionGroup::Dedicated(group_id))
                    .await?;
                group_id
            }
        };

        if meta.collection_id.filter(|id| *id != 0).is_none() {
            let description = dataset
                .description
                .clone()
                .unwrap_or_else(|| format!("Restricted collection for dataset {}", dataset.name));
            let collection_id = self
                .metabase_api
                .create_collection_with_access(
                    group_id,
                    restricted_collection_name(&dataset.name).as_str(),
                    description.as_str(),
                )
                .await?;
            self.metabase_repository
                .set_collection(dataset_id, Some(collection_id))
                .await?;
        }

        let service_account = self
            .service_account_api
            .ensure_service_account_with_key_and_binding(&ServiceAccountRequest {
                project_id: self.config.gcp_project_id.clone(),
                account_id: service_account_id(dataset_id),
                display_name: dataset.name.clone(),
                description: format!("Metabase service account for dataset {dataset_id}"),
                binding: ServiceAccountBinding {
                    project_id: self.config.gcp_project_id.clone(),
                    role: self.config.custom_role.clone(),
                },
            })
            .await?;
        self.metabase_repository
            .set_service_account(dataset_id, service_account.email.as_str())
            .await?;

        let meta = self.metabase_repository.get(dataset_id).await?;
        self.create(meta, service_account.key_json.as_str()).await
    }

    /// Grants the credential and creates the database, then completes it.
    pub(super) async fn create(&self, meta: MetabaseMetadata, sa_key_json: &str) -> AppResult<()> {
        let mut meta = meta;
        let dataset_id = meta.dataset_id;
        let bigquery = self
            .dataset_repository
            .get_bigquery_datasource(dataset_id)
            .await?;

        self.bigquery_api
            .grant(
                bigquery.project_id.as_str(),
                bigquery.dataset.as_str(),
                bigquery.table.as_str(),
                format!("serviceAccount:{}", meta.sa_email).as_str(),
            )
            .await?;

        if meta.database_id.is_none() {
            let dataset = self.dataset_repository.get_dataset(dataset_id).await?;
            let dataproduct = self.dataset_repository.get_dataproduct(&dataset).await?;
            let database_id = self
                .metabase_api
                .create_database(&NewMetabaseDatabase {
                    name: dataset.name.clone(),
                    team: dataproduct.owner.team_id.clone(),
                    project_id: bigquery.project_id.clone(),
                    dataset: bigquery.dataset.clone(),
                    sa_email: meta.sa_email.clone(),
                    sa_key_json: sa_key_json.to_owned(),
                })
                .await?;
            self.metabase_repository
                .set_database(dataset_id, database_id)
                .await?;
            meta.database_id = Some(database_id);
        }

        self.complete_creation(&meta).await
    }

    /// Waits for the schema of a created database, then applies access,
    /// table visibility and semantic types and marks the sync completed.
    ///
    /// Runs again for any checkpoint with a database but no completed sync. A
    /// database that never reports its table is rolled back completely and
    /// `metabase` is removed from the dataset's desired services.
    pub(super) async fn complete_creation(&self, meta: &MetabaseMetadata) -> AppResult<()> {
        let dataset_id = meta.dataset_id;
        let Some(database_id) = meta.database_id else {
            return Err(AppError::Internal(format!(
                "metabase database for dataset '{dataset_id}' has not been created"
            )));
        };
        let bigquery = self
            .dataset_repository
            .get_bigquery_datasource(dataset_id)
            .await?;

        if let Err(error) = self
            .wait_for_database(database_id, bigquery.table.as_str())
            .await
        {
            let mut steps = vec![
                Compensation::RemoveMetabaseMapping,
                Compensation::DeleteMetadata,
            ];
            if let Some(group_id) = meta.permission_group.dedicated_id() {
                steps.push(Compensation::DeletePermissionGroup(group_id));
            }
            if let Some(collection_id) = meta.collection_id.filter(|id| *id != 0) {
                steps.push(Compensation::ArchiveCollection(collection_id));
            }
            if !self.is_shared_service_account(meta.sa_email.as_str()) {
                steps.push(Compensation::DeleteServiceAccount(meta.sa_email.clone()));
            }
            steps.push(Compensation::RevokeGrant {
                project_id: bigquery.project_id.clone(),
                dataset: bigquery.dataset.clone(),
                table: bigquery.table.clone(),
                member: format!("serviceAccount:{}", meta.sa_email),
            });
            steps.push(Compensation::DeleteDatabase(database_id));

            self.compensate(dataset_id, steps).await;
            return Err(AppError::Internal(format!(
                "metabase database {database_id} for dataset '{dataset_id}' was rolled back: {error}"
            )));
        }

        match meta.permission_group.dedicated_id() {
            Some(group_id) => {
                self.metabase_api
                    .restrict_access_to_database(&[group_id], database_id)
                    .await?;
            }
            None => {
                self.metabase_api
                    .open_access_to_database(database_id)
                    .await?;
            }
        }

        self.sync_table_visibility(dataset_id).await?;
        self.auto_map_semantic_types(database_id, bigquery.table.as_str())
            .await?;
        self.metabase_repository
            .set_sync_completed(dataset_id)
            .await?;

        info!(
            %dataset_id,
            database_id,
            restricted = meta.permission_group.dedicated_id().is_some(),
            "metabase database created"
        );
        Ok(())
    }

    /// Polls until Metabase reports `table` with field metadata.
    async fn wait_for_database(&self, database_id: i64, table: &str) -> AppResult<()> {
        let poll = self.config.database_poll;

        for attempt in 1..=poll.attempts {
            match self.metabase_api.tables(database_id).await {
                Ok(tables) => {
                    if tables
                        .iter()
                        .any(|candidate| candidate.name == table && !candidate.fields.is_empty())
                    {
                        return Ok(());
                    }
                }
                Err(error) => {
                    debug!(
                        database_id,
                        attempt,
                        error = %error,
                        "metabase tables not available yet"
                    );
                }
            }

            if attempt < poll.attempts {
                tokio::time::sleep(poll.interval).await;
            }
        }

        Err(AppError::Internal(format!(
            "table '{table}' did not appear in metabase database {database_id} after {} attempts",
            poll.attempts
        )))
    }

    async fn auto_map_semantic_types(&self, database_id: i64, table: &str) -> AppResult<()> {
        let tables = self.metabase_api.tables(database_id).await?;
        let Some(table) = tables.into_iter().find(|candidate| candidate.name == table) else {
            return Ok(());
        };

        for field in table.fields {
            let target = SEMANTIC_TYPES
                .iter()
                .find(|(database_type, _)| *database_type == field.database_type)
                .map(|(_, semantic_type)| *semantic_type);

            if let Some(semantic_type) = target
                && field.semantic_type.as_deref() != Some(semantic_type)
            {
                self.metabase_api
                    .map_semantic_type(field.id, semantic_type)
                    .await?;
            }
        }

        Ok(())
    }

    /// Runs undo steps in reverse. Failures are logged and skipped.
    async fn compensate(&self, dataset_id: DatasetId, steps: Vec<Compensation>) {
        for step in steps.into_iter().rev() {
            let result = match &step {
                Compensation::DeleteDatabase(database_id) => {
                    self.metabase_api.delete_database(*database_id).await
                }
                Compensation::RevokeGrant {
                    project_id,
                    dataset,
                    table,
                    member,
                } => {
                    self.bigquery_api
                        .revoke(
                            project_id.as_str(),
                            dataset.as_str(),
                            table.as_str(),
                            member.as_str(),
                        )
                        .await
                }
                Compensation::DeleteServiceAccount(email) => {
                    self.service_account_api
                        .delete_service_account_and_bindings(
                            self.config.gcp_project_id.as_str(),
                            email.as_str(),
                        )
                        .await
                }
                Compensation::ArchiveCollection(collection_id) => {
                    self.metabase_api.archive_collection(*collection_id).await
                }
                Compensation::DeletePermissionGroup(group_id) => {
                    self.metabase_api.delete_permission_group(*group_id).await
                }
                Compensation::DeleteMetadata => self.metabase_repository.delete(dataset_id).await,
                Compensation::RemoveMetabaseMapping => {
                    self.remove_metabase_from_mapping(dataset_id).await
                }
            };

            if let Err(error) = ignore_not_exist(result) {
                warn!(%dataset_id, step = ?step, error = %error, "metabase rollback step failed");
            }
        }
    }

    async fn remove_metabase_from_mapping(&self, dataset_id: DatasetId) -> AppResult<()> {
        let mapping = self.mapping_repository.get(dataset_id).await?;
        let services: Vec<String> = mapping
            .services
            .into_iter()
            .filter(|service| service != METABASE_SERVICE)
            .collect();

        self.mapping_repository
            .upsert(dataset_id, &services)
            .await
            .map(|_| ())
    }
}
