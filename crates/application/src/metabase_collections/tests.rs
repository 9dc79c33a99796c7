use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nada_core::{AppError, Group, User};
use nada_domain::{DatasetId, MetabaseMetadata, PermissionGroup, restricted_collection_name};

use crate::metabase_ports::{MetabaseCollection, MetabaseRepository};
use crate::test_support::{
    FakeDatasetRepository, FakeLeaderElector, FakeMetabaseApi, FakeMetabaseRepository, must,
    outsider,
};

use super::{CollectionsReport, DanglingCollection, MetabaseCollectionsSyncer, MissingCollection};

const OPERATORS: &str = "nada@nav.no";

struct Harness {
    syncer: MetabaseCollectionsSyncer,
    api: Arc<FakeMetabaseApi>,
    metadata: Arc<FakeMetabaseRepository>,
}

fn harness() -> Harness {
    let api = Arc::new(FakeMetabaseApi::default());
    let metadata = Arc::new(FakeMetabaseRepository::new(Arc::new(
        FakeDatasetRepository::default(),
    )));
    let syncer = MetabaseCollectionsSyncer::new(
        api.clone(),
        metadata.clone(),
        Arc::new(FakeLeaderElector::new(true)),
        Duration::from_secs(3600),
    )
    .with_operator_group(OPERATORS);

    Harness {
        syncer,
        api,
        metadata,
    }
}

async fn restricted_mapping(h: &Harness, database_id: i64, collection_id: i64) -> DatasetId {
    let dataset_id = DatasetId::new();
    let meta = MetabaseMetadata {
        database_id: Some(database_id),
        permission_group: PermissionGroup::Dedicated(database_id + 1),
        collection_id: Some(collection_id),
        sa_email: "nada-sa@nada-prod.iam.gserviceaccount.com".to_owned(),
        sync_completed: Some(Utc::now()),
        ..MetabaseMetadata::new(dataset_id)
    };
    must(h.metadata.create(&meta).await);
    dataset_id
}

async fn live_collection(h: &Harness, id: i64, name: &str) {
    h.api.collections.lock().await.insert(
        id,
        MetabaseCollection {
            id,
            name: name.to_owned(),
            description: None,
        },
    );
}

#[tokio::test]
async fn reports_stored_collections_missing_in_metabase() {
    let h = harness();
    let intact = restricted_mapping(&h, 10, 4).await;
    let broken = restricted_mapping(&h, 20, 5).await;
    live_collection(&h, 4, restricted_collection_name("Sykefravær").as_str()).await;
    live_collection(&h, 6, "Felles analyser").await;

    let report = must(h.syncer.collections_report().await);

    assert_eq!(
        report,
        CollectionsReport {
            missing: vec![MissingCollection {
                dataset_id: broken,
                collection_id: 5,
                database_id: Some(20),
            }],
            dangling: Vec::new(),
        }
    );
    assert_ne!(intact, broken);
}

#[tokio::test]
async fn reports_restricted_collections_without_a_mapping() {
    let h = harness();
    live_collection(&h, 7, restricted_collection_name("Gammelt datasett").as_str()).await;
    live_collection(&h, 8, "Felles analyser").await;

    let report = must(h.syncer.collections_report().await);

    assert!(report.missing.is_empty());
    assert_eq!(
        report.dangling,
        vec![DanglingCollection {
            id: 7,
            name: restricted_collection_name("Gammelt datasett"),
        }]
    );
}

#[tokio::test]
async fn open_and_unsynced_mappings_are_not_reported() {
    let h = harness();
    let dataset_id = DatasetId::new();
    must(
        h.metadata
            .create(&MetabaseMetadata {
                database_id: Some(30),
                permission_group: PermissionGroup::Dedicated(31),
                collection_id: Some(32),
                ..MetabaseMetadata::new(dataset_id)
            })
            .await,
    );

    let report = must(h.syncer.collections_report().await);

    assert_eq!(report, CollectionsReport::default());
}

#[tokio::test]
async fn restores_the_restricted_marker_once() {
    let h = harness();
    restricted_mapping(&h, 10, 4).await;
    live_collection(&h, 4, "Sykefravær ").await;
    live_collection(&h, 9, "Felles analyser").await;

    assert_eq!(must(h.syncer.add_restricted_tag_to_collections().await), 1);
    assert_eq!(must(h.syncer.add_restricted_tag_to_collections().await), 0);

    let collections = h.api.collections.lock().await;
    assert_eq!(
        collections.get(&4).map(|collection| collection.name.clone()),
        Some(restricted_collection_name("Sykefravær"))
    );
    assert_eq!(
        collections.get(&9).map(|collection| collection.name.clone()),
        Some("Felles analyser".to_owned())
    );
    drop(collections);
    assert_eq!(h.api.count("update_collection:").await, 1);
}

#[tokio::test]
async fn report_is_limited_to_the_operator_group() {
    let h = harness();
    let dataset_id = restricted_mapping(&h, 10, 4).await;
    let operator = User::new(
        "Nora Drift",
        "nora.drift@nav.no",
        vec![Group {
            name: "nada".to_owned(),
            email: OPERATORS.to_owned(),
        }],
    );

    let denied = h.syncer.collections_report_for(&outsider()).await;
    assert!(matches!(denied, Err(AppError::Unauthorized(_))));

    let report = must(h.syncer.collections_report_for(&operator).await);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].dataset_id, dataset_id);

    let unconfigured = MetabaseCollectionsSyncer::new(
        h.api.clone(),
        h.metadata.clone(),
        Arc::new(FakeLeaderElector::new(true)),
        Duration::from_secs(3600),
    );
    let result = unconfigured.collections_report_for(&operator).await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));
}
