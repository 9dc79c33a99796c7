//! Application services and ports.

#![forbid(unsafe_code)]

mod access_ports;
mod access_service;
mod authorization;
mod gcp_ports;
mod metabase_collections;
mod metabase_mapper;
mod metabase_ports;
mod metabase_service;

#[cfg(test)]
mod test_support;

pub use access_ports::{
    AccessRepository, AccessRequestNotification, AccessRequestNotifier, DatasetRepository,
    GrantAccessRecord, JoinableViewRepository, MetabaseAccessPropagator, NewAccessRequest,
    PollyRepository, UpdateAccessRequestRecord,
};
pub use access_service::{
    AccessService, CreateAccessRequestInput, GrantAccessInput, UpdateAccessRequestInput,
};
pub use authorization::ensure_user_in_group;
pub use gcp_ports::{
    BigQueryApi, PseudonymisedView, ServiceAccountApi, ServiceAccountBinding,
    ServiceAccountRequest, ServiceAccountWithPrivateKey,
};
pub use metabase_collections::{
    CollectionsReport, DanglingCollection, MetabaseCollectionsSyncer, MissingCollection,
};
pub use metabase_mapper::{
    DEFAULT_QUEUE_CAPACITY, MappingOutcome, MappingQueueReceiver, MappingQueueSender,
    MetabaseMapper, MetabaseMapperConfig, mapping_queue,
};
pub use metabase_ports::{
    DatasetMapper, LeaderElector, MappingQueue, MetabaseApi, MetabaseCollection, MetabaseField,
    MetabaseRepository, MetabaseTable, NewMetabaseDatabase, PermissionGroupMember,
    ThirdPartyMappingRepository,
};
pub use metabase_service::{DatabasePollConfig, MetabaseService, MetabaseServiceConfig};
