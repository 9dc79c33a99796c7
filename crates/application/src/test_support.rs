//! In-memory fakes of every port, recording the calls tests assert on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use nada_core::{AppError, AppResult, Group, User};
use nada_domain::{
    Access, AccessId, AccessRequest, AccessRequestId, AccessRequestStatus, BigQuery,
    DataproductId, Dataproduct, Dataset, DatasetId, JoinableView, MetabaseMetadata, Owner,
    PermissionGroup, PiiLevel, Polly, PollyInput, Subject, ThirdPartyMapping,
    service_account_email,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::access_ports::{
    AccessRepository, AccessRequestNotification, AccessRequestNotifier, DatasetRepository,
    GrantAccessRecord, JoinableViewRepository, MetabaseAccessPropagator, NewAccessRequest,
    PollyRepository, UpdateAccessRequestRecord,
};
use crate::gcp_ports::{
    BigQueryApi, PseudonymisedView, ServiceAccountApi, ServiceAccountRequest,
    ServiceAccountWithPrivateKey,
};
use crate::metabase_ports::{
    LeaderElector, MappingQueue, MetabaseApi, MetabaseCollection, MetabaseField,
    MetabaseRepository, MetabaseTable, NewMetabaseDatabase, PermissionGroupMember,
    ThirdPartyMappingRepository,
};

pub(crate) const ALL_USERS: &str = "all-users@nav.no";
pub(crate) const OWNER_GROUP: &str = "team-sykefravaer@nav.no";
pub(crate) const GCP_PROJECT: &str = "nada-prod";
pub(crate) const SHARED_SA: &str = "nada-metabase@nada-prod.iam.gserviceaccount.com";

pub(crate) fn must<T>(result: AppResult<T>) -> T {
    result.unwrap_or_else(|error| panic!("{error}"))
}

pub(crate) fn owner() -> User {
    User::new(
        "Kari Eier",
        "kari.eier@nav.no",
        vec![Group {
            name: "team-sykefravaer".to_owned(),
            email: OWNER_GROUP.to_owned(),
        }],
    )
}

pub(crate) fn outsider() -> User {
    User::new("Ola Utenfor", "ola.utenfor@nav.no", Vec::new())
}

pub(crate) fn user_subject(email: &str) -> Subject {
    must(Subject::user(email))
}

pub(crate) fn all_users_subject() -> Subject {
    must(Subject::group(ALL_USERS))
}

/// Dataset with its dataproduct and BigQuery datasource.
#[derive(Debug, Clone)]
pub(crate) struct DatasetFixture {
    pub dataset: Dataset,
    pub dataproduct: Dataproduct,
    pub bigquery: BigQuery,
}

pub(crate) fn dataset_fixture(name: &str, table: &str, pii: PiiLevel) -> DatasetFixture {
    let dataset_id = DatasetId::new();
    let dataproduct_id = DataproductId::new();
    DatasetFixture {
        dataset: Dataset {
            id: dataset_id,
            dataproduct_id,
            name: name.to_owned(),
            description: None,
            pii,
        },
        dataproduct: Dataproduct {
            id: dataproduct_id,
            name: "Sykefravær".to_owned(),
            owner: Owner {
                group: OWNER_GROUP.to_owned(),
                team_contact: Some("#team-sykefravaer".to_owned()),
                team_id: Some("team-sykefravaer".to_owned()),
            },
        },
        bigquery: BigQuery {
            id: Uuid::new_v4(),
            dataset_id,
            project_id: "team-sykefravaer-prod".to_owned(),
            dataset: "fravaer".to_owned(),
            table: table.to_owned(),
            table_type: "TABLE".to_owned(),
            pseudo_columns: Vec::new(),
            missing_since: None,
        },
    }
}

fn lock_sync<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct FakeAccessRepository {
    pub accesses: Mutex<Vec<Access>>,
    pub requests: Mutex<Vec<AccessRequest>>,
}

impl FakeAccessRepository {
    pub(crate) async fn seed_access(&self, dataset_id: DatasetId, subject: Subject) -> Access {
        let access = Access {
            id: AccessId::new(),
            subject,
            granter: "kari.eier@nav.no".to_owned(),
            expires: None,
            created: Utc::now(),
            revoked: None,
            dataset_id,
            access_request_id: None,
        };
        self.accesses.lock().await.push(access.clone());
        access
    }
}

fn not_exist(what: &str, id: impl std::fmt::Display) -> AppError {
    AppError::NotExist(format!("{what} '{id}'"))
}

#[async_trait]
impl AccessRepository for FakeAccessRepository {
    async fn find_access(&self, access_id: AccessId) -> AppResult<Access> {
        self.accesses
            .lock()
            .await
            .iter()
            .find(|access| access.id == access_id)
            .cloned()
            .ok_or_else(|| not_exist("access", access_id))
    }

    async fn list_active_access_to_dataset(&self, dataset_id: DatasetId) -> AppResult<Vec<Access>> {
        let now = Utc::now();
        Ok(self
            .accesses
            .lock()
            .await
            .iter()
            .filter(|access| access.dataset_id == dataset_id && access.is_active(now))
            .cloned()
            .collect())
    }

    async fn grant_access_to_dataset_and_renew(
        &self,
        record: GrantAccessRecord,
    ) -> AppResult<Access> {
        let now = Utc::now();
        let mut accesses = self.accesses.lock().await;
        for access in accesses.iter_mut().filter(|access| {
            access.dataset_id == record.dataset_id
                && access.subject == record.subject
                && access.is_active(now)
        }) {
            access.revoked = Some(now);
        }

        let access = Access {
            id: AccessId::new(),
            subject: record.subject,
            granter: record.granter,
            expires: record.expires,
            created: now,
            revoked: None,
            dataset_id: record.dataset_id,
            access_request_id: None,
        };
        accesses.push(access.clone());
        Ok(access)
    }

    async fn revoke_access_to_dataset(&self, access_id: AccessId) -> AppResult<()> {
        let mut accesses = self.accesses.lock().await;
        let access = accesses
            .iter_mut()
            .find(|access| access.id == access_id)
            .ok_or_else(|| not_exist("access", access_id))?;
        access.revoked.get_or_insert_with(Utc::now);
        Ok(())
    }

    async fn create_access_request(&self, request: NewAccessRequest) -> AppResult<AccessRequest> {
        let access_request = AccessRequest {
            id: AccessRequestId::new(),
            dataset_id: request.dataset_id,
            subject: request.subject,
            owner: request.owner,
            status: AccessRequestStatus::Pending,
            expires: request.expires,
            created: Utc::now(),
            granter: None,
            closed: None,
            reason: None,
            polly: request.polly_id.map(|id| Polly {
                id,
                external_id: String::new(),
                name: String::new(),
                url: String::new(),
            }),
        };
        self.requests.lock().await.push(access_request.clone());
        Ok(access_request)
    }

    async fn find_access_request(&self, request_id: AccessRequestId) -> AppResult<AccessRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .find(|request| request.id == request_id)
            .cloned()
            .ok_or_else(|| not_exist("access request", request_id))
    }

    async fn list_access_requests_for_dataset(
        &self,
        dataset_id: DatasetId,
    ) -> AppResult<Vec<AccessRequest>> {
        Ok(self
            .requests
            .lock()
            .await
            .iter()
            .filter(|request| request.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    async fn update_access_request(
        &self,
        record: UpdateAccessRequestRecord,
    ) -> AppResult<AccessRequest> {
        let mut requests = self.requests.lock().await;
        let request = requests
            .iter_mut()
            .find(|request| request.id == record.id)
            .ok_or_else(|| not_exist("access request", record.id))?;
        request.owner = record.owner;
        request.expires = record.expires;
        request.polly = record.polly_id.map(|id| Polly {
            id,
            external_id: String::new(),
            name: String::new(),
            url: String::new(),
        });
        Ok(request.clone())
    }

    async fn delete_access_request(&self, request_id: AccessRequestId) -> AppResult<()> {
        let mut requests = self.requests.lock().await;
        let before = requests.len();
        requests.retain(|request| request.id != request_id);
        if requests.len() == before {
            return Err(not_exist("access request", request_id));
        }
        Ok(())
    }

    async fn approve_access_request(
        &self,
        request_id: AccessRequestId,
        granter: &str,
    ) -> AppResult<Access> {
        let now = Utc::now();
        let mut requests = self.requests.lock().await;
        let request = requests
            .iter_mut()
            .find(|request| request.id == request_id)
            .ok_or_else(|| not_exist("access request", request_id))?;
        request.status = AccessRequestStatus::Approved;
        request.granter = Some(granter.to_owned());
        request.closed = Some(now);

        let access = Access {
            id: AccessId::new(),
            subject: request.subject.clone(),
            granter: granter.to_owned(),
            expires: request.expires,
            created: now,
            revoked: None,
            dataset_id: request.dataset_id,
            access_request_id: Some(request.id),
        };
        self.accesses.lock().await.push(access.clone());
        Ok(access)
    }

    async fn deny_access_request(
        &self,
        request_id: AccessRequestId,
        granter: &str,
        reason: Option<&str>,
    ) -> AppResult<()> {
        let mut requests = self.requests.lock().await;
        let request = requests
            .iter_mut()
            .find(|request| request.id == request_id)
            .ok_or_else(|| not_exist("access request", request_id))?;
        request.status = AccessRequestStatus::Denied;
        request.granter = Some(granter.to_owned());
        request.closed = Some(Utc::now());
        request.reason = reason.map(str::to_owned);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeDatasetRepository {
    pub fixtures: Mutex<HashMap<DatasetId, DatasetFixture>>,
}

impl FakeDatasetRepository {
    pub(crate) fn with(fixtures: &[&DatasetFixture]) -> Self {
        Self {
            fixtures: Mutex::new(
                fixtures
                    .iter()
                    .map(|fixture| (fixture.dataset.id, (*fixture).clone()))
                    .collect(),
            ),
        }
    }

    async fn fixture(&self, dataset_id: DatasetId) -> AppResult<DatasetFixture> {
        self.fixtures
            .lock()
            .await
            .get(&dataset_id)
            .cloned()
            .ok_or_else(|| not_exist("dataset", dataset_id))
    }
}

#[async_trait]
impl DatasetRepository for FakeDatasetRepository {
    async fn get_dataset(&self, dataset_id: DatasetId) -> AppResult<Dataset> {
        Ok(self.fixture(dataset_id).await?.dataset)
    }

    async fn get_dataproduct(&self, dataset: &Dataset) -> AppResult<Dataproduct> {
        Ok(self.fixture(dataset.id).await?.dataproduct)
    }

    async fn get_bigquery_datasource(&self, dataset_id: DatasetId) -> AppResult<BigQuery> {
        Ok(self.fixture(dataset_id).await?.bigquery)
    }
}

#[derive(Default)]
pub(crate) struct FakeJoinableViewRepository {
    pub views: Vec<JoinableView>,
}

#[async_trait]
impl JoinableViewRepository for FakeJoinableViewRepository {
    async fn list_joinable_views_for_reference_and_user(
        &self,
        _owner: &str,
        _dataset_id: DatasetId,
    ) -> AppResult<Vec<JoinableView>> {
        Ok(self.views.clone())
    }
}

#[derive(Default)]
pub(crate) struct FakePollyRepository {
    pub stored: Mutex<Vec<Polly>>,
}

#[async_trait]
impl PollyRepository for FakePollyRepository {
    async fn create_polly_documentation(&self, input: PollyInput) -> AppResult<Polly> {
        let polly = Polly {
            id: Uuid::new_v4(),
            external_id: input.external_id,
            name: input.name,
            url: input.url,
        };
        self.stored.lock().await.push(polly.clone());
        Ok(polly)
    }
}

#[derive(Default)]
pub(crate) struct FakeNotifier {
    pub sent: Mutex<Vec<AccessRequestNotification>>,
    pub fail: bool,
}

#[async_trait]
impl AccessRequestNotifier for FakeNotifier {
    async fn notify_access_request(
        &self,
        notification: AccessRequestNotification,
    ) -> AppResult<()> {
        if self.fail {
            return Err(AppError::Io("slack webhook unavailable".to_owned()));
        }
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

/// One recorded BigQuery ACL change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct BigQueryCall {
    pub action: &'static str,
    pub target: String,
    pub member: String,
}

#[derive(Default)]
pub(crate) struct FakeBigQueryApi {
    pub calls: Mutex<Vec<BigQueryCall>>,
    pub acl: Mutex<HashSet<(String, String)>>,
    pub failing_targets: Mutex<HashSet<String>>,
}

impl FakeBigQueryApi {
    pub(crate) async fn grants(&self) -> Vec<BigQueryCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.action == "grant")
            .cloned()
            .collect()
    }

    async fn record(
        &self,
        action: &'static str,
        project_id: &str,
        dataset: &str,
        table: &str,
        member: &str,
    ) -> AppResult<String> {
        let target = format!("{project_id}.{dataset}.{table}");
        self.calls.lock().await.push(BigQueryCall {
            action,
            target: target.clone(),
            member: member.to_owned(),
        });
        if self.failing_targets.lock().await.contains(&target) {
            return Err(AppError::Io(format!("bigquery rejected {action} on {target}")));
        }
        Ok(target)
    }
}

#[async_trait]
impl BigQueryApi for FakeBigQueryApi {
    async fn grant(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        member: &str,
    ) -> AppResult<()> {
        let target = self
            .record("grant", project_id, dataset, table, member)
            .await?;
        self.acl.lock().await.insert((target, member.to_owned()));
        Ok(())
    }

    async fn revoke(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        member: &str,
    ) -> AppResult<()> {
        let target = self
            .record("revoke", project_id, dataset, table, member)
            .await?;
        self.acl.lock().await.remove(&(target, member.to_owned()));
        Ok(())
    }

    async fn add_to_authorized_views(
        &self,
        _source_project_id: &str,
        _source_dataset: &str,
        _view_project_id: &str,
        _view_dataset: &str,
        _view_table: &str,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn create_pseudonymised_view(
        &self,
        project_id: &str,
        dataset: &str,
        table: &str,
        _pseudo_columns: &[String],
    ) -> AppResult<PseudonymisedView> {
        Ok(PseudonymisedView {
            project_id: project_id.to_owned(),
            dataset: format!("{dataset}_pseudo"),
            table: table.to_owned(),
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeServiceAccountApi {
    pub accounts: Mutex<HashMap<String, u32>>,
    pub ensured: Mutex<Vec<ServiceAccountRequest>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceAccountApi for FakeServiceAccountApi {
    async fn ensure_service_account_with_key_and_binding(
        &self,
        request: &ServiceAccountRequest,
    ) -> AppResult<ServiceAccountWithPrivateKey> {
        self.ensured.lock().await.push(request.clone());
        let email = service_account_email(request.account_id.as_str(), request.project_id.as_str());
        let mut accounts = self.accounts.lock().await;
        let key_version = accounts.entry(email.clone()).or_insert(0);
        *key_version += 1;

        Ok(ServiceAccountWithPrivateKey {
            key_json: format!("{{\"client_email\":\"{email}\",\"key\":{key_version}}}"),
            email,
        })
    }

    async fn delete_service_account_and_bindings(
        &self,
        _project_id: &str,
        email: &str,
    ) -> AppResult<()> {
        if self.accounts.lock().await.remove(email).is_none() {
            return Err(not_exist("service account", email));
        }
        self.deleted.lock().await.push(email.to_owned());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FakeGroup {
    name: String,
    members: Vec<PermissionGroupMember>,
}

/// Metabase with per-call recording and a controllable schema sync.
pub(crate) struct FakeMetabaseApi {
    next_id: Mutex<i64>,
    pub tables_ready: AtomicBool,
    pub schema: Mutex<Vec<String>>,
    pub databases: Mutex<HashMap<i64, NewMetabaseDatabase>>,
    groups: Mutex<HashMap<i64, FakeGroup>>,
    pub collections: Mutex<HashMap<i64, MetabaseCollection>>,
    pub visible_tables: Mutex<HashSet<i64>>,
    pub calls: Mutex<Vec<String>>,
}

impl Default for FakeMetabaseApi {
    fn default() -> Self {
        Self {
            next_id: Mutex::new(100),
            tables_ready: AtomicBool::new(true),
            schema: Mutex::new(Vec::new()),
            databases: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            collections: Mutex::new(HashMap::new()),
            visible_tables: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeMetabaseApi {
    /// Tables every created database reports once its schema sync is done.
    pub(crate) fn with_tables(tables: &[&str]) -> Self {
        Self {
            schema: Mutex::new(tables.iter().map(|table| (*table).to_owned()).collect()),
            ..Self::default()
        }
    }

    async fn next_id(&self) -> i64 {
        let mut next_id = self.next_id.lock().await;
        *next_id += 1;
        *next_id
    }

    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }

    pub(crate) async fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub(crate) async fn group_members(&self, group_id: i64) -> Vec<String> {
        self.groups
            .lock()
            .await
            .get(&group_id)
            .map(|group| {
                group
                    .members
                    .iter()
                    .map(|member| member.email.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) async fn group_exists(&self, group_id: i64) -> bool {
        self.groups.lock().await.contains_key(&group_id)
    }

    /// Table ids are derived from the database id and the schema position.
    fn table_id(database_id: i64, position: usize) -> i64 {
        database_id * 1000 + i64::try_from(position).unwrap_or(0)
    }
}

#[async_trait]
impl MetabaseApi for FakeMetabaseApi {
    async fn create_database(&self, database: &NewMetabaseDatabase) -> AppResult<i64> {
        let id = self.next_id().await;
        self.databases.lock().await.insert(id, database.clone());
        self.record(format!("create_database:{id}")).await;
        Ok(id)
    }

    async fn delete_database(&self, database_id: i64) -> AppResult<()> {
        self.record(format!("delete_database:{database_id}")).await;
        self.databases
            .lock()
            .await
            .remove(&database_id)
            .map(|_| ())
            .ok_or_else(|| not_exist("database", database_id))
    }

    async fn tables(&self, database_id: i64) -> AppResult<Vec<MetabaseTable>> {
        if !self.databases.lock().await.contains_key(&database_id) {
            return Err(not_exist("database", database_id));
        }
        if !self.tables_ready.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        Ok(self
            .schema
            .lock()
            .await
            .iter()
            .enumerate()
            .map(|(position, name)| {
                let id = Self::table_id(database_id, position);
                MetabaseTable {
                    id,
                    name: name.clone(),
                    fields: vec![
                        MetabaseField {
                            id: id * 10 + 1,
                            name: "navn".to_owned(),
                            database_type: "STRING".to_owned(),
                            semantic_type: None,
                        },
                        MetabaseField {
                            id: id * 10 + 2,
                            name: "opprettet".to_owned(),
                            database_type: "TIMESTAMP".to_owned(),
                            semantic_type: Some("type/CreationTimestamp".to_owned()),
                        },
                    ],
                }
            })
            .collect())
    }

    async fn hide_tables(&self, table_ids: &[i64]) -> AppResult<()> {
        let mut visible = self.visible_tables.lock().await;
        for table_id in table_ids {
            visible.remove(table_id);
        }
        self.record(format!("hide_tables:{table_ids:?}")).await;
        Ok(())
    }

    async fn show_tables(&self, table_ids: &[i64]) -> AppResult<()> {
        self.visible_tables
            .lock()
            .await
            .extend(table_ids.iter().copied());
        self.record(format!("show_tables:{table_ids:?}")).await;
        Ok(())
    }

    async fn map_semantic_type(&self, field_id: i64, semantic_type: &str) -> AppResult<()> {
        self.record(format!("map_semantic_type:{field_id}:{semantic_type}"))
            .await;
        Ok(())
    }

    async fn get_or_create_permission_group(&self, name: &str) -> AppResult<i64> {
        if let Some((id, _)) = self
            .groups
            .lock()
            .await
            .iter()
            .find(|(_, group)| group.name == name)
        {
            return Ok(*id);
        }

        let id = self.next_id().await;
        self.groups.lock().await.insert(
            id,
            FakeGroup {
                name: name.to_owned(),
                members: Vec::new(),
            },
        );
        self.record(format!("create_permission_group:{id}")).await;
        Ok(id)
    }

    async fn get_permission_group(&self, group_id: i64) -> AppResult<Vec<PermissionGroupMember>> {
        self.groups
            .lock()
            .await
            .get(&group_id)
            .map(|group| group.members.clone())
            .ok_or_else(|| not_exist("permission group", group_id))
    }

    async fn add_permission_group_member(&self, group_id: i64, email: &str) -> AppResult<()> {
        let membership_id = self.next_id().await;
        let mut groups = self.groups.lock().await;
        let group = groups
            .get_mut(&group_id)
            .ok_or_else(|| not_exist("permission group", group_id))?;
        group.members.push(PermissionGroupMember {
            membership_id,
            email: email.to_owned(),
        });
        drop(groups);
        self.record(format!("add_permission_group_member:{group_id}:{email}"))
            .await;
        Ok(())
    }

    async fn remove_permission_group_member(&self, membership_id: i64) -> AppResult<()> {
        for group in self.groups.lock().await.values_mut() {
            group
                .members
                .retain(|member| member.membership_id != membership_id);
        }
        self.record(format!("remove_permission_group_member:{membership_id}"))
            .await;
        Ok(())
    }

    async fn delete_permission_group(&self, group_id: i64) -> AppResult<()> {
        self.record(format!("delete_permission_group:{group_id}"))
            .await;
        self.groups
            .lock()
            .await
            .remove(&group_id)
            .map(|_| ())
            .ok_or_else(|| not_exist("permission group", group_id))
    }

    async fn restrict_access_to_database(
        &self,
        group_ids: &[i64],
        database_id: i64,
    ) -> AppResult<()> {
        self.record(format!("restrict_access_to_database:{database_id}:{group_ids:?}"))
            .await;
        Ok(())
    }

    async fn open_access_to_database(&self, database_id: i64) -> AppResult<()> {
        self.record(format!("open_access_to_database:{database_id}"))
            .await;
        Ok(())
    }

    async fn create_collection_with_access(
        &self,
        group_id: i64,
        name: &str,
        description: &str,
    ) -> AppResult<i64> {
        let id = self.next_id().await;
        self.collections.lock().await.insert(
            id,
            MetabaseCollection {
                id,
                name: name.to_owned(),
                description: Some(description.to_owned()),
            },
        );
        self.record(format!("create_collection:{id}:{group_id}"))
            .await;
        Ok(id)
    }

    async fn archive_collection(&self, collection_id: i64) -> AppResult<()> {
        self.record(format!("archive_collection:{collection_id}"))
            .await;
        self.collections
            .lock()
            .await
            .remove(&collection_id)
            .map(|_| ())
            .ok_or_else(|| not_exist("collection", collection_id))
    }

    async fn get_collections(&self) -> AppResult<Vec<MetabaseCollection>> {
        let mut collections: Vec<_> = self.collections.lock().await.values().cloned().collect();
        collections.sort_by_key(|collection| collection.id);
        Ok(collections)
    }

    async fn update_collection(&self, collection: &MetabaseCollection) -> AppResult<()> {
        self.record(format!("update_collection:{}", collection.id))
            .await;
        self.collections
            .lock()
            .await
            .insert(collection.id, collection.clone());
        Ok(())
    }
}

pub(crate) struct FakeMetabaseRepository {
    pub rows: Mutex<HashMap<DatasetId, MetabaseMetadata>>,
    datasets: Arc<FakeDatasetRepository>,
}

impl FakeMetabaseRepository {
    pub(crate) fn new(datasets: Arc<FakeDatasetRepository>) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            datasets,
        }
    }

    async fn update(
        &self,
        dataset_id: DatasetId,
        apply: impl FnOnce(&mut MetabaseMetadata) + Send,
    ) -> AppResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .get_mut(&dataset_id)
            .ok_or_else(|| not_exist("metabase metadata", dataset_id))?;
        apply(row);
        Ok(())
    }
}

#[async_trait]
impl MetabaseRepository for FakeMetabaseRepository {
    async fn create(&self, meta: &MetabaseMetadata) -> AppResult<()> {
        self.rows.lock().await.insert(meta.dataset_id, meta.clone());
        Ok(())
    }

    async fn get(&self, dataset_id: DatasetId) -> AppResult<MetabaseMetadata> {
        self.rows
            .lock()
            .await
            .get(&dataset_id)
            .cloned()
            .ok_or_else(|| not_exist("metabase metadata", dataset_id))
    }

    async fn set_database(&self, dataset_id: DatasetId, database_id: i64) -> AppResult<()> {
        self.update(dataset_id, |row| row.database_id = Some(database_id))
            .await
    }

    async fn set_permission_group(
        &self,
        dataset_id: DatasetId,
        permission_group: PermissionGroup,
    ) -> AppResult<()> {
        self.update(dataset_id, |row| row.permission_group = permission_group)
            .await
    }

    async fn set_collection(
        &self,
        dataset_id: DatasetId,
        collection_id: Option<i64>,
    ) -> AppResult<()> {
        self.update(dataset_id, |row| row.collection_id = collection_id)
            .await
    }

    async fn set_service_account(&self, dataset_id: DatasetId, sa_email: &str) -> AppResult<()> {
        let sa_email = sa_email.to_owned();
        self.update(dataset_id, move |row| row.sa_email = sa_email)
            .await
    }

    async fn set_sync_completed(&self, dataset_id: DatasetId) -> AppResult<()> {
        self.update(dataset_id, |row| row.sync_completed = Some(Utc::now()))
            .await
    }

    async fn soft_delete(&self, dataset_id: DatasetId) -> AppResult<()> {
        self.update(dataset_id, |row| row.deleted_at = Some(Utc::now()))
            .await
    }

    async fn restore(&self, dataset_id: DatasetId) -> AppResult<()> {
        self.update(dataset_id, |row| row.deleted_at = None).await
    }

    async fn delete(&self, dataset_id: DatasetId) -> AppResult<()> {
        self.rows
            .lock()
            .await
            .remove(&dataset_id)
            .map(|_| ())
            .ok_or_else(|| not_exist("metabase metadata", dataset_id))
    }

    async fn list_sync_completed(&self) -> AppResult<Vec<MetabaseMetadata>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|row| row.sync_completed.is_some() && !row.is_soft_deleted())
            .cloned()
            .collect())
    }

    async fn list_open_tables_in_bigquery_dataset(
        &self,
        project_id: &str,
        dataset: &str,
    ) -> AppResult<Vec<String>> {
        let open: Vec<DatasetId> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|row| {
                row.sync_completed.is_some() && !row.is_soft_deleted() && !row.is_restricted()
            })
            .map(|row| row.dataset_id)
            .collect();

        let fixtures = self.datasets.fixtures.lock().await;
        Ok(open
            .iter()
            .filter_map(|dataset_id| fixtures.get(dataset_id))
            .filter(|fixture| {
                fixture.bigquery.project_id == project_id && fixture.bigquery.dataset == dataset
            })
            .map(|fixture| fixture.bigquery.table.clone())
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeMappingRepository {
    pub rows: Mutex<HashMap<DatasetId, ThirdPartyMapping>>,
}

#[async_trait]
impl ThirdPartyMappingRepository for FakeMappingRepository {
    async fn get(&self, dataset_id: DatasetId) -> AppResult<ThirdPartyMapping> {
        self.rows
            .lock()
            .await
            .get(&dataset_id)
            .cloned()
            .ok_or_else(|| not_exist("third-party mapping", dataset_id))
    }

    async fn upsert(
        &self,
        dataset_id: DatasetId,
        services: &[String],
    ) -> AppResult<ThirdPartyMapping> {
        let mut rows = self.rows.lock().await;
        let previous = rows.get(&dataset_id);
        let mut updated_at = Utc::now();
        if let Some(previous) = previous
            && previous.updated_at >= updated_at
        {
            updated_at = previous.updated_at + Duration::microseconds(1);
        }

        let mapping = ThirdPartyMapping {
            dataset_id,
            services: services.to_vec(),
            updated_at,
            processed_at: previous.and_then(|previous| previous.processed_at),
        };
        rows.insert(dataset_id, mapping.clone());
        Ok(mapping)
    }

    async fn list_unprocessed(&self) -> AppResult<Vec<ThirdPartyMapping>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|mapping| !mapping.is_processed())
            .cloned()
            .collect())
    }

    async fn mark_processed(
        &self,
        dataset_id: DatasetId,
        version: DateTime<Utc>,
    ) -> AppResult<()> {
        if let Some(mapping) = self.rows.lock().await.get_mut(&dataset_id)
            && mapping.updated_at == version
        {
            mapping.processed_at = Some(version);
        }
        Ok(())
    }

    async fn mark_pending(&self, dataset_id: DatasetId) -> AppResult<()> {
        let mut rows = self.rows.lock().await;
        let mapping = rows
            .get_mut(&dataset_id)
            .ok_or_else(|| not_exist("third-party mapping", dataset_id))?;
        mapping.processed_at = None;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingPropagator {
    pub grants: Mutex<Vec<(DatasetId, Subject)>>,
    pub revokes: Mutex<Vec<(DatasetId, Subject)>>,
}

#[async_trait]
impl MetabaseAccessPropagator for RecordingPropagator {
    async fn grant_metabase_access(
        &self,
        dataset_id: DatasetId,
        subject: &Subject,
    ) -> AppResult<()> {
        self.grants.lock().await.push((dataset_id, subject.clone()));
        Ok(())
    }

    async fn revoke_metabase_access(
        &self,
        dataset_id: DatasetId,
        subject: &Subject,
    ) -> AppResult<()> {
        self.revokes.lock().await.push((dataset_id, subject.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingQueue {
    queued: std::sync::Mutex<Vec<DatasetId>>,
}

impl RecordingQueue {
    pub(crate) fn queued(&self) -> Vec<DatasetId> {
        lock_sync(&self.queued).clone()
    }
}

impl MappingQueue for RecordingQueue {
    fn queue(&self, dataset_id: DatasetId) {
        lock_sync(&self.queued).push(dataset_id);
    }
}

pub(crate) struct FakeLeaderElector {
    pub leader: AtomicBool,
}

impl FakeLeaderElector {
    pub(crate) fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }
}

#[async_trait]
impl LeaderElector for FakeLeaderElector {
    async fn is_leader(&self) -> AppResult<bool> {
        Ok(self.leader.load(Ordering::SeqCst))
    }
}
