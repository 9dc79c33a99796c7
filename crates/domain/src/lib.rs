//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod access;
mod dataset;
mod ids;
mod mapping;
mod metabase;
mod subject;

pub use access::{Access, AccessRequest, AccessRequestStatus, Polly, PollyInput};
pub use dataset::{BigQuery, Dataproduct, Dataset, JoinableView, Owner, PiiLevel};
pub use ids::{AccessId, AccessRequestId, DataproductId, DatasetId};
pub use mapping::{METABASE_SERVICE, ThirdPartyMapping, validate_services};
pub use metabase::{
    MappingState, MetabaseMetadata, PermissionGroup, RESTRICTED_COLLECTION_TAG,
    has_restricted_tag, permission_group_name, restricted_collection_name, service_account_email,
    service_account_id,
};
pub use subject::{Subject, SubjectType};
