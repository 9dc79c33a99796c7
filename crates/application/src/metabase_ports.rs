use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nada_core::AppResult;
use nada_domain::{DatasetId, MetabaseMetadata, PermissionGroup, ThirdPartyMapping};
use serde::{Deserialize, Serialize};

/// BigQuery database connection to create in Metabase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMetabaseDatabase {
    /// Database display name.
    pub name: String,
    /// Owning team, used as a name prefix.
    pub team: Option<String>,
    /// GCP project of the BigQuery dataset.
    pub project_id: String,
    /// BigQuery dataset the connection is filtered to.
    pub dataset: String,
    /// Service account email used for the connection.
    pub sa_email: String,
    /// Service account key file contents.
    pub sa_key_json: String,
}

/// Column metadata reported by Metabase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetabaseField {
    /// Field id.
    pub id: i64,
    /// Column name.
    pub name: String,
    /// BigQuery column type, e.g. `STRING`.
    pub database_type: String,
    /// Current Metabase semantic type.
    pub semantic_type: Option<String>,
}

/// Table metadata reported by Metabase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetabaseTable {
    /// Table id.
    pub id: i64,
    /// Table name.
    pub name: String,
    /// Fields, empty until Metabase finished its schema sync.
    pub fields: Vec<MetabaseField>,
}

/// Collection as listed by Metabase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetabaseCollection {
    /// Collection id.
    pub id: i64,
    /// Collection name.
    pub name: String,
    /// Collection description.
    pub description: Option<String>,
}

/// Membership of a user in a permission group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroupMember {
    /// Membership id used for removal.
    pub membership_id: i64,
    /// Member email.
    pub email: String,
}

/// Session-authenticated Metabase capability.
///
/// Deletes and archives report `NotExist` for resources already gone.
#[async_trait]
pub trait MetabaseApi: Send + Sync {
    /// Creates a BigQuery database connection and returns its id.
    async fn create_database(&self, database: &NewMetabaseDatabase) -> AppResult<i64>;

    /// Deletes a database connection.
    async fn delete_database(&self, database_id: i64) -> AppResult<()>;

    /// Lists the tables of a database with field metadata.
    async fn tables(&self, database_id: i64) -> AppResult<Vec<MetabaseTable>>;

    /// Hides tables from the data browser.
    async fn hide_tables(&self, table_ids: &[i64]) -> AppResult<()>;

    /// Makes tables visible in the data browser.
    async fn show_tables(&self, table_ids: &[i64]) -> AppResult<()>;

    /// Sets the semantic type of a field.
    async fn map_semantic_type(&self, field_id: i64, semantic_type: &str) -> AppResult<()>;

    /// Returns the id of the named group, creating it when absent.
    async fn get_or_create_permission_group(&self, name: &str) -> AppResult<i64>;

    /// Lists the members of a group.
    async fn get_permission_group(&self, group_id: i64) -> AppResult<Vec<PermissionGroupMember>>;

    /// Adds a user, by email, to a group.
    async fn add_permission_group_member(&self, group_id: i64, email: &str) -> AppResult<()>;

    /// Removes a membership.
    async fn remove_permission_group_member(&self, membership_id: i64) -> AppResult<()>;

    /// Deletes a group.
    async fn delete_permission_group(&self, group_id: i64) -> AppResult<()>;

    /// Grants data access on a database to the given groups only.
    async fn restrict_access_to_database(&self, group_ids: &[i64], database_id: i64)
    -> AppResult<()>;

    /// Grants data access on a database to the all-users group.
    async fn open_access_to_database(&self, database_id: i64) -> AppResult<()>;

    /// Creates a collection readable by one group and returns its id.
    async fn create_collection_with_access(
        &self,
        group_id: i64,
        name: &str,
        description: &str,
    ) -> AppResult<i64>;

    /// Archives a collection.
    async fn archive_collection(&self, collection_id: i64) -> AppResult<()>;

    /// Lists non-archived collections.
    async fn get_collections(&self) -> AppResult<Vec<MetabaseCollection>>;

    /// Updates the name and description of a collection.
    async fn update_collection(&self, collection: &MetabaseCollection) -> AppResult<()>;
}

/// Reconciliation checkpoint storage for Metabase mappings.
#[async_trait]
pub trait MetabaseRepository: Send + Sync {
    /// Inserts an empty checkpoint.
    async fn create(&self, meta: &MetabaseMetadata) -> AppResult<()>;

    /// Returns the checkpoint including soft-deleted ones, `NotExist` when missing.
    async fn get(&self, dataset_id: DatasetId) -> AppResult<MetabaseMetadata>;

    /// Persists the database id.
    async fn set_database(&self, dataset_id: DatasetId, database_id: i64) -> AppResult<()>;

    /// Persists the permission group.
    async fn set_permission_group(
        &self,
        dataset_id: DatasetId,
        permission_group: PermissionGroup,
    ) -> AppResult<()>;

    /// Persists or clears the collection id.
    async fn set_collection(&self, dataset_id: DatasetId, collection_id: Option<i64>)
    -> AppResult<()>;

    /// Persists the service account email.
    async fn set_service_account(&self, dataset_id: DatasetId, sa_email: &str) -> AppResult<()>;

    /// Marks database creation and table visibility as done.
    async fn set_sync_completed(&self, dataset_id: DatasetId) -> AppResult<()>;

    /// Sets `deleted_at`.
    async fn soft_delete(&self, dataset_id: DatasetId) -> AppResult<()>;

    /// Clears `deleted_at`.
    async fn restore(&self, dataset_id: DatasetId) -> AppResult<()>;

    /// Removes the checkpoint row.
    async fn delete(&self, dataset_id: DatasetId) -> AppResult<()>;

    /// Lists checkpoints with completed sync, soft-deleted ones excluded.
    async fn list_sync_completed(&self) -> AppResult<Vec<MetabaseMetadata>>;

    /// Lists tables of open, synced mappings within one BigQuery dataset.
    async fn list_open_tables_in_bigquery_dataset(
        &self,
        project_id: &str,
        dataset: &str,
    ) -> AppResult<Vec<String>>;
}

/// Storage of desired third-party services per dataset.
#[async_trait]
pub trait ThirdPartyMappingRepository: Send + Sync {
    /// Returns the mapping, `NotExist` when none was ever stored.
    async fn get(&self, dataset_id: DatasetId) -> AppResult<ThirdPartyMapping>;

    /// Replaces the desired services and marks the mapping unprocessed.
    async fn upsert(&self, dataset_id: DatasetId, services: &[String])
    -> AppResult<ThirdPartyMapping>;

    /// Lists mappings whose current version was not mapped yet.
    async fn list_unprocessed(&self) -> AppResult<Vec<ThirdPartyMapping>>;

    /// Marks `version` processed; a no-op when the mapping changed since.
    async fn mark_processed(&self, dataset_id: DatasetId, version: DateTime<Utc>)
    -> AppResult<()>;

    /// Marks an existing mapping unprocessed so the next poll picks it up.
    async fn mark_pending(&self, dataset_id: DatasetId) -> AppResult<()>;
}

/// Entry point that drives one dataset towards its desired services.
#[async_trait]
pub trait DatasetMapper: Send + Sync {
    /// Maps or unmaps the dataset according to `services`.
    async fn map_dataset(&self, dataset_id: DatasetId, services: &[String]) -> AppResult<()>;
}

/// Low latency path into the mapping worker.
pub trait MappingQueue: Send + Sync {
    /// Queues a dataset without blocking; dropped with a warning when full.
    fn queue(&self, dataset_id: DatasetId);
}

/// Decides which replica runs background workers.
#[async_trait]
pub trait LeaderElector: Send + Sync {
    /// Returns whether this replica is the elected leader.
    async fn is_leader(&self) -> AppResult<bool>;
}
