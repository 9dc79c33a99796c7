use std::sync::Arc;

use nada_application::{LeaderElector, MappingQueueReceiver, MetabaseMapper, MetabaseService};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::state::AppState;

/// Background loops sharing the server's shutdown token.
pub struct BackgroundWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundWorkers {
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(error) = handle.await {
                warn!(error = %error, "background worker ended abnormally");
            }
        }
    }
}

pub fn spawn_background_workers(
    state: &AppState,
    mapper: MetabaseMapper,
    mapping_receiver: MappingQueueReceiver,
    leader: Arc<dyn LeaderElector>,
    shutdown: CancellationToken,
) -> BackgroundWorkers {
    let mapper_shutdown = shutdown.clone();
    let mapper_handle = tokio::spawn(async move {
        mapper.run(mapping_receiver, mapper_shutdown).await;
    });

    let syncer = state.collections_syncer.clone();
    let syncer_shutdown = shutdown.clone();
    let syncer_handle = tokio::spawn(async move {
        syncer.run(syncer_shutdown).await;
    });

    let metabase_service = state.metabase_service.clone();
    let visibility_handle = tokio::spawn(async move {
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = sync_tables_visibility_on_leader(metabase_service, leader) => {}
        }
    });

    BackgroundWorkers {
        handles: vec![mapper_handle, syncer_handle, visibility_handle],
    }
}

async fn sync_tables_visibility_on_leader(
    metabase_service: MetabaseService,
    leader: Arc<dyn LeaderElector>,
) {
    match leader.is_leader().await {
        Ok(true) => {}
        Ok(false) => return,
        Err(error) => {
            warn!(error = %error, "leader check before table visibility sync failed");
            return;
        }
    }

    info!("syncing metabase table visibility");
    if let Err(error) = metabase_service.sync_all_tables_visibility().await {
        warn!(error = %error, "metabase table visibility sync failed");
    }
}
