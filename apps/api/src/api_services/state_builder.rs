use std::sync::Arc;

use nada_application::{
    AccessService, DEFAULT_QUEUE_CAPACITY, LeaderElector, MappingQueue, MappingQueueReceiver,
    MetabaseCollectionsSyncer, MetabaseMapper, MetabaseService, MetabaseServiceConfig,
    mapping_queue,
};
use nada_core::AppError;
use nada_infrastructure::{
    BigQueryRestClient, IamServiceAccountClient, PostgresAccessRepository,
    PostgresDatasetRepository, PostgresMetabaseRepository,
};
use sqlx::PgPool;

use super::clients::{
    build_google_client, build_http_client, build_metabase_client, build_notifier,
};
use super::leader::build_leader_elector;
use crate::api_config::ApiConfig;
use crate::state::AppState;

/// Request state plus the pieces owned by the background loops.
pub struct AppRuntime {
    pub state: AppState,
    pub mapper: MetabaseMapper,
    pub mapping_receiver: MappingQueueReceiver,
    pub leader: Arc<dyn LeaderElector>,
}

pub fn build_app_runtime(config: &ApiConfig, pool: PgPool) -> Result<AppRuntime, AppError> {
    let http_client = build_http_client()?;

    let google_client = build_google_client(config, http_client.clone());
    let bigquery_api = Arc::new(BigQueryRestClient::new(
        google_client.clone(),
        config.bigquery_location.as_str(),
    ));
    let service_account_api = Arc::new(IamServiceAccountClient::new(google_client));
    let metabase_api = Arc::new(build_metabase_client(config, http_client.clone()));

    let access_repository = Arc::new(PostgresAccessRepository::new(pool.clone()));
    let dataset_repository = Arc::new(PostgresDatasetRepository::new(pool.clone()));
    let metabase_repository = Arc::new(PostgresMetabaseRepository::new(pool));

    let (queue_sender, mapping_receiver) = mapping_queue(DEFAULT_QUEUE_CAPACITY);
    let queue: Arc<dyn MappingQueue> = Arc::new(queue_sender);

    let metabase_service = MetabaseService::new(
        metabase_api.clone(),
        metabase_repository.clone(),
        metabase_repository.clone(),
        access_repository.clone(),
        dataset_repository.clone(),
        bigquery_api.clone(),
        service_account_api,
        MetabaseServiceConfig {
            gcp_project_id: config.gcp_project_id.clone(),
            service_account_email: config.metabase.sa_email.clone(),
            service_account_key: config.metabase.sa_key.clone(),
            custom_role: config.metabase.custom_role.clone(),
            all_users_group: config.all_users_group.clone(),
            database_poll: config.metabase.database_poll,
        },
    )
    .with_mapping_queue(queue.clone());
    let metabase_service_port = Arc::new(metabase_service.clone());

    let access_service = AccessService::new(
        access_repository,
        dataset_repository.clone(),
        dataset_repository.clone(),
        dataset_repository,
        bigquery_api,
        config.all_users_group.as_str(),
    )
    .with_notifier(build_notifier(config, http_client.clone()))
    .with_metabase(metabase_service_port.clone(), queue);

    let leader = build_leader_elector(&config.leader_election, http_client)?;
    let mapper = MetabaseMapper::new(
        metabase_service_port,
        metabase_repository.clone(),
        leader.clone(),
        config.metabase.mapper,
    );
    let collections_syncer = Arc::new(MetabaseCollectionsSyncer::new(
        metabase_api,
        metabase_repository,
        leader.clone(),
        config.metabase.collections_sync_interval,
    )
    .with_operator_group(config.operator_group.clone()));

    Ok(AppRuntime {
        state: AppState {
            access_service,
            metabase_service,
            collections_syncer,
            gcp_project_id: config.gcp_project_id.clone(),
        },
        mapper,
        mapping_receiver,
        leader,
    })
}
