//! Background worker feeding datasets into the Metabase state machine.
//!
//! Work arrives through a bounded queue for low latency and through a periodic
//! poll of unprocessed mappings. A single consumer maps one dataset at a time,
//! and only on the elected leader.

use std::sync::Arc;
use std::time::Duration;

use nada_core::AppError;
use nada_domain::{DatasetId, ThirdPartyMapping};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metabase_ports::{
    DatasetMapper, LeaderElector, MappingQueue, ThirdPartyMappingRepository,
};

/// Default capacity of the mapping queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Creates a bounded mapping queue.
#[must_use]
pub fn mapping_queue(capacity: usize) -> (MappingQueueSender, MappingQueueReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        MappingQueueSender { sender },
        MappingQueueReceiver { receiver },
    )
}

/// Producer side of the mapping queue.
#[derive(Clone)]
pub struct MappingQueueSender {
    sender: mpsc::Sender<DatasetId>,
}

impl MappingQueue for MappingQueueSender {
    fn queue(&self, dataset_id: DatasetId) {
        match self.sender.try_send(dataset_id) {
            Ok(()) => debug!(%dataset_id, "dataset queued for metabase mapping"),
            Err(TrySendError::Full(_)) => {
                warn!(%dataset_id, "metabase mapping queue full; dataset left for the next poll");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%dataset_id, "metabase mapping queue closed");
            }
        }
    }
}

/// Consumer side of the mapping queue.
pub struct MappingQueueReceiver {
    receiver: mpsc::Receiver<DatasetId>,
}

/// Timing of the mapper loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetabaseMapperConfig {
    /// Interval between polls for unprocessed mappings.
    pub tick_interval: Duration,
    /// Upper bound for a single dataset mapping.
    pub mapping_deadline: Duration,
}

impl Default for MetabaseMapperConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            mapping_deadline: Duration::from_secs(600),
        }
    }
}

/// Result of one mapping attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingOutcome {
    /// Mapped; the observed version was marked processed.
    Mapped,
    /// Refused as an invalid transition; marked processed, not retried.
    Rejected,
    /// Failed; retried on a later poll.
    Failed,
    /// Exceeded the deadline; retried on a later poll.
    TimedOut,
}

/// Single-consumer Metabase mapping worker.
pub struct MetabaseMapper {
    mapper: Arc<dyn DatasetMapper>,
    mappings: Arc<dyn ThirdPartyMappingRepository>,
    leader: Arc<dyn LeaderElector>,
    config: MetabaseMapperConfig,
}

impl MetabaseMapper {
    /// Creates a mapper.
    #[must_use]
    pub fn new(
        mapper: Arc<dyn DatasetMapper>,
        mappings: Arc<dyn ThirdPartyMappingRepository>,
        leader: Arc<dyn LeaderElector>,
        config: MetabaseMapperConfig,
    ) -> Self {
        Self {
            mapper,
            mappings,
            leader,
            config,
        }
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(&self, mut queue: MappingQueueReceiver, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_interval_seconds = self.config.tick_interval.as_secs(),
            mapping_deadline_seconds = self.config.mapping_deadline.as_secs(),
            "metabase mapper started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                queued = queue.receiver.recv() => match queued {
                    Some(dataset_id) => self.process_queued(dataset_id).await,
                    None => {
                        warn!("metabase mapping queue closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.process_unprocessed().await;
                }
            }
        }

        info!("metabase mapper stopped");
    }

    /// Maps a dataset pushed on the queue.
    ///
    /// On a follower the mapping is marked pending so the leader's next poll
    /// picks it up.
    pub async fn process_queued(&self, dataset_id: DatasetId) {
        if !self.is_leader().await {
            if let Err(error) = self.mappings.mark_pending(dataset_id).await
                && !error.is_not_exist()
            {
                warn!(%dataset_id, error = %error, "failed to mark metabase mapping pending");
            }
            return;
        }

        match self.mappings.get(dataset_id).await {
            Ok(mapping) => {
                self.process_one(&mapping).await;
            }
            Err(error) if error.is_not_exist() => {
                debug!(%dataset_id, "no third-party mapping stored; nothing to map");
            }
            Err(error) => {
                warn!(%dataset_id, error = %error, "failed to load third-party mapping");
            }
        }
    }

    /// Maps every mapping whose latest version is unprocessed.
    pub async fn process_unprocessed(&self) -> usize {
        if !self.is_leader().await {
            return 0;
        }

        let mappings = match self.mappings.list_unprocessed().await {
            Ok(mappings) => mappings,
            Err(error) => {
                warn!(error = %error, "failed to list unprocessed metabase mappings");
                return 0;
            }
        };

        let mut mapped = 0;
        for mapping in &mappings {
            if self.process_one(mapping).await == MappingOutcome::Mapped {
                mapped += 1;
            }
        }

        if !mappings.is_empty() {
            info!(pending = mappings.len(), mapped, "metabase mapping poll finished");
        }
        mapped
    }

    /// Runs one deadline-bound mapping attempt.
    pub async fn process_one(&self, mapping: &ThirdPartyMapping) -> MappingOutcome {
        let dataset_id = mapping.dataset_id;
        let attempt = timeout(
            self.config.mapping_deadline,
            self.mapper.map_dataset(dataset_id, &mapping.services),
        )
        .await;

        let outcome = match attempt {
            Err(_) => {
                warn!(
                    %dataset_id,
                    deadline_seconds = self.config.mapping_deadline.as_secs(),
                    "metabase mapping timed out"
                );
                return MappingOutcome::TimedOut;
            }
            Ok(Ok(())) => MappingOutcome::Mapped,
            Ok(Err(AppError::InvalidRequest(message))) => {
                warn!(%dataset_id, error = %message, "metabase mapping rejected");
                MappingOutcome::Rejected
            }
            Ok(Err(error)) => {
                warn!(%dataset_id, error = %error, "metabase mapping failed");
                return MappingOutcome::Failed;
            }
        };

        if let Err(error) = self
            .mappings
            .mark_processed(dataset_id, mapping.updated_at)
            .await
        {
            warn!(%dataset_id, error = %error, "failed to mark metabase mapping processed");
        }

        outcome
    }

    async fn is_leader(&self) -> bool {
        match self.leader.is_leader().await {
            Ok(is_leader) => is_leader,
            Err(error) => {
                warn!(error = %error, "leader election check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests;
