//! Drift detection between stored collection ids and Metabase.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use nada_core::{AppError, AppResult, ResultExt, User};
use nada_domain::{DatasetId, has_restricted_tag, restricted_collection_name};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::authorization::ensure_user_in_group;
use crate::metabase_ports::{LeaderElector, MetabaseApi, MetabaseRepository};

/// Stored collection id that Metabase no longer knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingCollection {
    /// Dataset whose mapping is broken.
    pub dataset_id: DatasetId,
    /// Collection id from storage.
    pub collection_id: i64,
    /// Database id from storage.
    pub database_id: Option<i64>,
}

/// Restricted Metabase collection without a stored mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingCollection {
    /// Collection id.
    pub id: i64,
    /// Collection name.
    pub name: String,
}

/// Collections drift between storage and Metabase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionsReport {
    /// Collections referenced by storage but absent in Metabase.
    pub missing: Vec<MissingCollection>,
    /// Restricted collections in Metabase absent from storage.
    pub dangling: Vec<DanglingCollection>,
}

/// Periodic, leader-only collections reconciler. Reports only; never heals.
pub struct MetabaseCollectionsSyncer {
    metabase_api: Arc<dyn MetabaseApi>,
    metabase_repository: Arc<dyn MetabaseRepository>,
    leader: Arc<dyn LeaderElector>,
    sync_interval: Duration,
    operator_group: Option<String>,
}

impl MetabaseCollectionsSyncer {
    /// Creates a collections syncer.
    #[must_use]
    pub fn new(
        metabase_api: Arc<dyn MetabaseApi>,
        metabase_repository: Arc<dyn MetabaseRepository>,
        leader: Arc<dyn LeaderElector>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            metabase_api,
            metabase_repository,
            leader,
            sync_interval,
            operator_group: None,
        }
    }

    /// Lets members of `group` read the collections report.
    #[must_use]
    pub fn with_operator_group(mut self, group: impl Into<String>) -> Self {
        self.operator_group = Some(group.into());
        self
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => self.sync_once().await,
            }
        }

        info!("metabase collections syncer stopped");
    }

    async fn sync_once(&self) {
        match self.leader.is_leader().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                warn!(error = %error, "leader election check failed");
                return;
            }
        }

        match self.collections_report().await {
            Ok(report) => {
                for missing in &report.missing {
                    warn!(
                        dataset_id = %missing.dataset_id,
                        collection_id = missing.collection_id,
                        database_id = ?missing.database_id,
                        "metabase collection missing"
                    );
                }
                for dangling in &report.dangling {
                    warn!(
                        collection_id = dangling.id,
                        name = %dangling.name,
                        "metabase collection dangling"
                    );
                }
            }
            Err(error) => warn!(error = %error, "metabase collections report failed"),
        }

        match self.add_restricted_tag_to_collections().await {
            Ok(0) => {}
            Ok(tagged) => info!(tagged, "restricted marker restored on metabase collections"),
            Err(error) => warn!(error = %error, "tagging restricted collections failed"),
        }
    }

    /// Returns the collections report to members of the operator group.
    pub async fn collections_report_for(&self, user: &User) -> AppResult<CollectionsReport> {
        const OP: &str = "metabase_collections.collections_report_for";

        let Some(group) = self.operator_group.as_deref() else {
            return Err(
                AppError::Unauthorized("no operator group is configured".to_owned()).with_op(OP),
            );
        };
        ensure_user_in_group(user, group).op(OP)?;

        self.collections_report().await
    }

    /// Compares restricted, sync-completed mappings with live collections.
    pub async fn collections_report(&self) -> AppResult<CollectionsReport> {
        const OP: &str = "metabase_collections.collections_report";

        let collections = self.metabase_api.get_collections().await.op(OP)?;
        let restricted: Vec<_> = self
            .metabase_repository
            .list_sync_completed()
            .await
            .op(OP)?
            .into_iter()
            .filter(|meta| meta.is_restricted())
            .collect();

        let live: HashSet<i64> = collections.iter().map(|collection| collection.id).collect();
        let stored: HashSet<i64> = restricted
            .iter()
            .filter_map(|meta| meta.collection_id)
            .collect();

        let missing = restricted
            .iter()
            .filter_map(|meta| {
                let collection_id = meta.collection_id?;
                (!live.contains(&collection_id)).then(|| MissingCollection {
                    dataset_id: meta.dataset_id,
                    collection_id,
                    database_id: meta.database_id,
                })
            })
            .collect();

        let dangling = collections
            .into_iter()
            .filter(|collection| {
                has_restricted_tag(collection.name.as_str()) && !stored.contains(&collection.id)
            })
            .map(|collection| DanglingCollection {
                id: collection.id,
                name: collection.name,
            })
            .collect();

        Ok(CollectionsReport { missing, dangling })
    }

    /// Appends the restricted marker to restricted collections lacking it.
    pub async fn add_restricted_tag_to_collections(&self) -> AppResult<usize> {
        const OP: &str = "metabase_collections.add_restricted_tag_to_collections";

        let stored: HashSet<i64> = self
            .metabase_repository
            .list_sync_completed()
            .await
            .op(OP)?
            .into_iter()
            .filter(|meta| meta.is_restricted())
            .filter_map(|meta| meta.collection_id)
            .collect();

        let mut tagged = 0;
        for mut collection in self.metabase_api.get_collections().await.op(OP)? {
            if !stored.contains(&collection.id) || has_restricted_tag(collection.name.as_str()) {
                continue;
            }

            collection.name = restricted_collection_name(collection.name.trim_end());
            self.metabase_api
                .update_collection(&collection)
                .await
                .op(OP)?;
            tagged += 1;
        }

        Ok(tagged)
    }
}

#[cfg(test)]
mod tests;
