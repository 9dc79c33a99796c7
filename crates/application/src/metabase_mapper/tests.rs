use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use nada_core::{AppError, AppResult};
use nada_domain::{DatasetId, METABASE_SERVICE};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::metabase_ports::{DatasetMapper, MappingQueue, ThirdPartyMappingRepository};
use crate::test_support::{FakeLeaderElector, FakeMappingRepository, must};

use super::{MappingOutcome, MetabaseMapper, MetabaseMapperConfig, mapping_queue};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Succeed,
    Reject,
    Fail,
    Hang,
}

#[derive(Default)]
struct ScriptedMapper {
    behaviors: Mutex<HashMap<DatasetId, Behavior>>,
    calls: Mutex<Vec<DatasetId>>,
}

impl ScriptedMapper {
    async fn script(&self, dataset_id: DatasetId, behavior: Behavior) {
        self.behaviors.lock().await.insert(dataset_id, behavior);
    }
}

#[async_trait]
impl DatasetMapper for ScriptedMapper {
    async fn map_dataset(&self, dataset_id: DatasetId, _services: &[String]) -> AppResult<()> {
        self.calls.lock().await.push(dataset_id);
        let behavior = self
            .behaviors
            .lock()
            .await
            .get(&dataset_id)
            .copied()
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Reject => Err(AppError::InvalidRequest("cannot restrict".to_owned())),
            Behavior::Fail => Err(AppError::Io("metabase unavailable".to_owned())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }
    }
}

struct Harness {
    mapper: Arc<MetabaseMapper>,
    scripted: Arc<ScriptedMapper>,
    mappings: Arc<FakeMappingRepository>,
    leader: Arc<FakeLeaderElector>,
}

fn harness(config: MetabaseMapperConfig) -> Harness {
    let scripted = Arc::new(ScriptedMapper::default());
    let mappings = Arc::new(FakeMappingRepository::default());
    let leader = Arc::new(FakeLeaderElector::new(true));
    let mapper = Arc::new(MetabaseMapper::new(
        scripted.clone(),
        mappings.clone(),
        leader.clone(),
        config,
    ));

    Harness {
        mapper,
        scripted,
        mappings,
        leader,
    }
}

fn short_deadline() -> MetabaseMapperConfig {
    MetabaseMapperConfig {
        tick_interval: Duration::from_secs(3600),
        mapping_deadline: Duration::from_millis(20),
    }
}

#[test]
fn full_queue_drops_instead_of_blocking() {
    let (sender, mut receiver) = mapping_queue(1);
    let first = DatasetId::new();

    sender.queue(first);
    sender.queue(DatasetId::new());

    assert_eq!(receiver.receiver.try_recv().ok(), Some(first));
    assert!(receiver.receiver.try_recv().is_err());
}

#[tokio::test]
async fn outcomes_decide_whether_the_version_is_processed() {
    let h = harness(short_deadline());
    let mut expectations = Vec::new();
    for (behavior, outcome, processed) in [
        (Behavior::Succeed, MappingOutcome::Mapped, true),
        (Behavior::Reject, MappingOutcome::Rejected, true),
        (Behavior::Fail, MappingOutcome::Failed, false),
        (Behavior::Hang, MappingOutcome::TimedOut, false),
    ] {
        let dataset_id = DatasetId::new();
        h.scripted.script(dataset_id, behavior).await;
        let mapping = must(
            h.mappings
                .upsert(dataset_id, &[METABASE_SERVICE.to_owned()])
                .await,
        );
        assert_eq!(h.mapper.process_one(&mapping).await, outcome);
        expectations.push((dataset_id, processed));
    }

    for (dataset_id, processed) in expectations {
        assert_eq!(must(h.mappings.get(dataset_id).await).is_processed(), processed);
    }
}

#[tokio::test]
async fn newer_desired_state_stays_unprocessed() {
    let h = harness(short_deadline());
    let dataset_id = DatasetId::new();
    let stale = must(
        h.mappings
            .upsert(dataset_id, &[METABASE_SERVICE.to_owned()])
            .await,
    );
    must(h.mappings.upsert(dataset_id, &[]).await);

    assert_eq!(h.mapper.process_one(&stale).await, MappingOutcome::Mapped);

    assert!(!must(h.mappings.get(dataset_id).await).is_processed());
    assert_eq!(h.mapper.process_unprocessed().await, 1);
    assert!(must(h.mappings.get(dataset_id).await).is_processed());
}

#[tokio::test]
async fn followers_leave_queued_work_to_the_leader() {
    let h = harness(short_deadline());
    h.leader.leader.store(false, Ordering::SeqCst);
    let dataset_id = DatasetId::new();
    let mapping = must(
        h.mappings
            .upsert(dataset_id, &[METABASE_SERVICE.to_owned()])
            .await,
    );
    must(
        h.mappings
            .mark_processed(dataset_id, mapping.updated_at)
            .await,
    );

    h.mapper.process_queued(dataset_id).await;
    h.mapper.process_queued(DatasetId::new()).await;

    assert!(h.scripted.calls.lock().await.is_empty());
    assert!(!must(h.mappings.get(dataset_id).await).is_processed());
    assert_eq!(h.mapper.process_unprocessed().await, 0);

    h.leader.leader.store(true, Ordering::SeqCst);
    assert_eq!(h.mapper.process_unprocessed().await, 1);
    assert_eq!(h.scripted.calls.lock().await.clone(), vec![dataset_id]);
}

#[tokio::test]
async fn leader_ignores_queued_datasets_without_a_mapping() {
    let h = harness(short_deadline());

    h.mapper.process_queued(DatasetId::new()).await;

    assert!(h.scripted.calls.lock().await.is_empty());
}

#[tokio::test]
async fn run_maps_queued_datasets_until_cancelled() {
    let h = harness(MetabaseMapperConfig {
        tick_interval: Duration::from_secs(3600),
        mapping_deadline: Duration::from_secs(5),
    });
    let (sender, receiver) = mapping_queue(8);
    let shutdown = CancellationToken::new();

    let mapper = h.mapper.clone();
    let token = shutdown.clone();
    let worker = tokio::spawn(async move { mapper.run(receiver, token).await });

    let dataset_id = DatasetId::new();
    must(
        h.mappings
            .upsert(dataset_id, &[METABASE_SERVICE.to_owned()])
            .await,
    );
    sender.queue(dataset_id);

    for _ in 0..200 {
        if must(h.mappings.get(dataset_id).await).is_processed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(must(h.mappings.get(dataset_id).await).is_processed());

    shutdown.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(1), worker).await;
    assert!(stopped.is_ok());
}
