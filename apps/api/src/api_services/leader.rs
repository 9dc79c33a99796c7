use std::sync::Arc;

use nada_application::LeaderElector;
use nada_core::AppError;
use nada_infrastructure::{AlwaysLeader, HttpLeaderElector, RedisLeaderElector};
use tracing::info;

use crate::api_config::LeaderElectionConfig;

const LEADER_LEASE_KEY: &str = "nada:metabase:leader";
const LEADER_LEASE_SECONDS: u32 = 30;

pub(super) fn build_leader_elector(
    config: &LeaderElectionConfig,
    http_client: reqwest::Client,
) -> Result<Arc<dyn LeaderElector>, AppError> {
    match config {
        LeaderElectionConfig::Sidecar { endpoint } => {
            info!(%endpoint, "using leader election sidecar");
            Ok(Arc::new(HttpLeaderElector::new(http_client, endpoint.as_str())?))
        }
        LeaderElectionConfig::Redis { redis_url } => {
            let client = redis::Client::open(redis_url.as_str())
                .map_err(|error| AppError::InvalidRequest(format!("invalid REDIS_URL: {error}")))?;
            let holder_id = hostname::get()
                .map_err(|error| AppError::Internal(format!("failed to read hostname: {error}")))?
                .to_string_lossy()
                .into_owned();

            info!(holder_id = %holder_id, "using redis leader lease");
            Ok(Arc::new(RedisLeaderElector::new(
                client,
                LEADER_LEASE_KEY,
                holder_id.as_str(),
                LEADER_LEASE_SECONDS,
            )?))
        }
        LeaderElectionConfig::Always => {
            info!("leader election disabled; this replica always leads");
            Ok(Arc::new(AlwaysLeader))
        }
    }
}
