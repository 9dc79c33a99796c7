//! Metabase mapping state machine.
//!
//! A dataset moves between unmapped, open, restricted and soft-deleted. The
//! `metabase_metadata` row is the checkpoint: every external resource id is
//! persisted as soon as it exists, and every creation step is guarded by the
//! corresponding field being unset, so a failed mapping resumes where it
//! stopped instead of creating duplicates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nada_core::{AppResult, ResultExt, User};
use nada_domain::{
    DatasetId, METABASE_SERVICE, MetabaseMetadata, Subject, ThirdPartyMapping, validate_services,
};
use tracing::info;

use crate::access_ports::{AccessRepository, DatasetRepository, MetabaseAccessPropagator};
use crate::authorization::ensure_user_in_group;
use crate::gcp_ports::{BigQueryApi, ServiceAccountApi};
use crate::metabase_ports::{
    DatasetMapper, MappingQueue, MetabaseApi, MetabaseRepository, ThirdPartyMappingRepository,
};

mod creation;
mod mapping;
mod membership;
mod teardown;
mod visibility;


/// Bounded wait for Metabase to finish its own schema sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabasePollConfig {
    /// Number of `tables` calls before giving up.
    pub attempts: u32,
    /// Pause between calls.
    pub interval: Duration,
}

impl Default for DatabasePollConfig {
    fn default() -> Self {
        Self {
            attempts: 200,
            interval: Duration::from_millis(100),
        }
    }
}

/// Static settings of the Metabase integration.
#[derive(Debug, Clone)]
pub struct MetabaseServiceConfig {
    /// Project owning the per-dataset service accounts.
    pub gcp_project_id: String,
    /// Shared service account used by open datasets.
    pub service_account_email: String,
    /// Key of the shared service account.
    pub service_account_key: String,
    /// IAM role bound to per-dataset service accounts.
    pub custom_role: String,
    /// Email of the all-users group.
    pub all_users_group: String,
    /// Schema sync wait budget.
    pub database_poll: DatabasePollConfig,
}

/// Drives Metabase resources towards the state implied by the access ledger.
#[derive(Clone)]
pub struct MetabaseService {
    metabase_api: Arc<dyn MetabaseApi>,
    metabase_repository: Arc<dyn MetabaseRepository>,
    mapping_repository: Arc<dyn ThirdPartyMappingRepository>,
    access_repository: Arc<dyn AccessRepository>,
    dataset_repository: Arc<dyn DatasetRepository>,
    bigquery_api: Arc<dyn BigQueryApi>,
    service_account_api: Arc<dyn ServiceAccountApi>,
    mapping_queue: Option<Arc<dyn MappingQueue>>,
    config: MetabaseServiceConfig,
}

impl MetabaseService {
    /// Creates a Metabase service.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        metabase_api: Arc<dyn MetabaseApi>,
        metabase_repository: Arc<dyn MetabaseRepository>,
        mapping_repository: Arc<dyn ThirdPartyMappingRepository>,
        access_repository: Arc<dyn AccessRepository>,
        dataset_repository: Arc<dyn DatasetRepository>,
        bigquery_api: Arc<dyn BigQueryApi>,
        service_account_api: Arc<dyn ServiceAccountApi>,
        config: MetabaseServiceConfig,
    ) -> Self {
        Self {
            metabase_api,
            metabase_repository,
            mapping_repository,
            access_repository,
            dataset_repository,
            bigquery_api,
            service_account_api,
            mapping_queue: None,
            config,
        }
    }

    /// Queues datasets on the mapper after mapping requests.
    #[must_use]
    pub fn with_mapping_queue(mut self, mapping_queue: Arc<dyn MappingQueue>) -> Self {
        self.mapping_queue = Some(mapping_queue);
        self
    }

    /// Maps or unmaps a dataset according to the desired services.
    pub async fn map_dataset(&self, dataset_id: DatasetId, services: &[String]) -> AppResult<()> {
        const OP: &str = "metabase_service.map_dataset";

        if services.iter().any(|service| service == METABASE_SERVICE) {
            let meta = self.ensure_metadata(dataset_id).await.op(OP)?;
            self.add_dataset_mapping(meta).await.op(OP)
        } else {
            self.delete_database(dataset_id).await.op(OP)
        }
    }

    /// Stores the desired services of a dataset and queues it for mapping.
    pub async fn request_mapping(
        &self,
        user: &User,
        dataset_id: DatasetId,
        services: &[String],
    ) -> AppResult<ThirdPartyMapping> {
        const OP: &str = "metabase_service.request_mapping";

        let dataset = self
            .dataset_repository
            .get_dataset(dataset_id)
            .await
            .op(OP)?;
        let dataproduct = self
            .dataset_repository
            .get_dataproduct(&dataset)
            .await
            .op(OP)?;
        ensure_user_in_group(user, dataproduct.owner.group.as_str()).op(OP)?;

        let services = validate_services(services).op(OP)?;
        let mapping = self
            .mapping_repository
            .upsert(dataset_id, &services)
            .await
            .op(OP)?;

        info!(%dataset_id, services = ?mapping.services, "third-party mapping requested");

        if let Some(queue) = &self.mapping_queue {
            queue.queue(dataset_id);
        }

        Ok(mapping)
    }

    /// Returns the Metabase checkpoint of a dataset.
    pub async fn metadata(&self, dataset_id: DatasetId) -> AppResult<MetabaseMetadata> {
        self.metabase_repository
            .get(dataset_id)
            .await
            .op("metabase_service.metadata")
    }

    async fn ensure_metadata(&self, dataset_id: DatasetId) -> AppResult<MetabaseMetadata> {
        match self.metabase_repository.get(dataset_id).await {
            Ok(meta) => Ok(meta),
            Err(error) if error.is_not_exist() => {
                let meta = MetabaseMetadata::new(dataset_id);
                self.metabase_repository.create(&meta).await?;
                Ok(meta)
            }
            Err(error) => Err(error),
        }
    }

    fn is_shared_service_account(&self, email: &str) -> bool {
        email.eq_ignore_ascii_case(self.config.service_account_email.as_str())
    }
}

#[async_trait]
impl DatasetMapper for MetabaseService {
    async fn map_dataset(&self, dataset_id: DatasetId, services: &[String]) -> AppResult<()> {
        MetabaseService::map_dataset(self, dataset_id, services).await
    }
}

#[async_trait]
impl MetabaseAccessPropagator for MetabaseService {
    async fn grant_metabase_access(
        &self,
        dataset_id: DatasetId,
        subject: &Subject,
    ) -> AppResult<()> {
        MetabaseService::grant_metabase_access(self, dataset_id, subject).await
    }

    async fn revoke_metabase_access(
        &self,
        dataset_id: DatasetId,
        subject: &Subject,
    ) -> AppResult<()> {
        MetabaseService::revoke_metabase_access(self, dataset_id, subject).await
    }
}

/// Treats `NotExist` as success for delete-if-exists steps.
fn ignore_not_exist(result: AppResult<()>) -> AppResult<()> {
    match result {
        Err(error) if error.is_not_exist() => Ok(()),
        other => other,
    }
}
