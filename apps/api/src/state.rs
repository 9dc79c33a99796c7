use std::sync::Arc;

use nada_application::{AccessService, MetabaseCollectionsSyncer, MetabaseService};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub access_service: AccessService,
    pub metabase_service: MetabaseService,
    pub collections_syncer: Arc<MetabaseCollectionsSyncer>,
    pub gcp_project_id: String,
}
