use chrono::{DateTime, Utc};
use heck::ToKebabCase;
use serde::{Deserialize, Serialize};

use crate::DatasetId;

/// Marker appended to the names of restricted Metabase collections.
pub const RESTRICTED_COLLECTION_TAG: &str = "🔐";

/// Metabase permission group backing a mapped dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PermissionGroup {
    /// No group has been decided or created yet.
    #[default]
    None,
    /// The dataset is visible through the shared all-users group.
    Shared,
    /// The dataset has its own group with this Metabase id.
    Dedicated(i64),
}

impl PermissionGroup {
    /// Decodes the stored column, where `0` marks the shared group.
    #[must_use]
    pub fn from_stored(value: Option<i64>) -> Self {
        match value {
            None => Self::None,
            Some(0) => Self::Shared,
            Some(id) => Self::Dedicated(id),
        }
    }

    /// Encodes the group for storage.
    #[must_use]
    pub fn to_stored(self) -> Option<i64> {
        match self {
            Self::None => None,
            Self::Shared => Some(0),
            Self::Dedicated(id) => Some(id),
        }
    }

    /// Returns the dedicated group id, if any.
    #[must_use]
    pub fn dedicated_id(self) -> Option<i64> {
        match self {
            Self::Dedicated(id) => Some(id),
            Self::None | Self::Shared => None,
        }
    }
}

/// Observable mapping state derived from [`MetabaseMetadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingState {
    /// No Metabase database exists for the dataset.
    Unmapped,
    /// Visible to everyone through the shared credential.
    Open,
    /// Visible to a dedicated permission group only.
    Restricted,
    /// Metabase resources kept, BigQuery grant withdrawn.
    SoftDeleted,
}

/// Reconciliation checkpoint of one dataset's Metabase resources.
///
/// Each field is persisted as soon as its resource exists, so a mapping that
/// failed halfway resumes from the first unset field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetabaseMetadata {
    /// Dataset being mapped.
    pub dataset_id: DatasetId,
    /// Metabase database resource.
    pub database_id: Option<i64>,
    /// Permission group serving the dataset.
    pub permission_group: PermissionGroup,
    /// Collection of a restricted dataset.
    pub collection_id: Option<i64>,
    /// Service account used as the BigQuery credential; empty until known.
    pub sa_email: String,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Set once the database exists and its tables are visible.
    pub sync_completed: Option<DateTime<Utc>>,
}

impl MetabaseMetadata {
    /// Creates the empty checkpoint written on the first mapping attempt.
    #[must_use]
    pub fn new(dataset_id: DatasetId) -> Self {
        Self {
            dataset_id,
            database_id: None,
            permission_group: PermissionGroup::None,
            collection_id: None,
            sa_email: String::new(),
            deleted_at: None,
            sync_completed: None,
        }
    }

    /// Returns whether the dataset uses a dedicated group and collection.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        self.collection_id.is_some_and(|id| id != 0)
    }

    /// Returns whether the mapping is parked with its grant withdrawn.
    #[must_use]
    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns the mapping state.
    #[must_use]
    pub fn state(&self) -> MappingState {
        if self.database_id.is_none() {
            MappingState::Unmapped
        } else if self.is_soft_deleted() {
            MappingState::SoftDeleted
        } else if self.is_restricted() {
            MappingState::Restricted
        } else {
            MappingState::Open
        }
    }
}

/// Returns the permission group name for a dataset, as a slug of its name.
#[must_use]
pub fn permission_group_name(dataset_name: &str) -> String {
    dataset_name.to_kebab_case()
}

/// Returns the tagged collection name of a restricted dataset.
#[must_use]
pub fn restricted_collection_name(dataset_name: &str) -> String {
    format!("{dataset_name} {RESTRICTED_COLLECTION_TAG}")
}

/// Returns whether a collection name carries the restricted marker.
#[must_use]
pub fn has_restricted_tag(collection_name: &str) -> bool {
    collection_name.contains(RESTRICTED_COLLECTION_TAG)
}

/// Returns the per-dataset service account id (6-30 characters).
#[must_use]
pub fn service_account_id(dataset_id: DatasetId) -> String {
    let simple = dataset_id.as_uuid().simple().to_string();
    format!("nada-{}", &simple[..25])
}

/// Returns the email of a service account in the given project.
#[must_use]
pub fn service_account_email(account_id: &str, project_id: &str) -> String {
    format!("{account_id}@{project_id}.iam.gserviceaccount.com")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        MappingState, MetabaseMetadata, PermissionGroup, has_restricted_tag, permission_group_name,
        restricted_collection_name, service_account_id,
    };
    use crate::DatasetId;

    #[test]
    fn stored_zero_is_the_shared_group() {
        assert_eq!(PermissionGroup::from_stored(None), PermissionGroup::None);
        assert_eq!(PermissionGroup::from_stored(Some(0)), PermissionGroup::Shared);
        assert_eq!(
            PermissionGroup::from_stored(Some(12)),
            PermissionGroup::Dedicated(12)
        );
        assert_eq!(PermissionGroup::Shared.to_stored(), Some(0));
    }

    #[test]
    fn state_follows_checkpoint_fields() {
        let mut meta = MetabaseMetadata::new(DatasetId::new());
        assert_eq!(meta.state(), MappingState::Unmapped);

        meta.database_id = Some(3);
        meta.permission_group = PermissionGroup::Shared;
        assert_eq!(meta.state(), MappingState::Open);

        meta.permission_group = PermissionGroup::Dedicated(7);
        meta.collection_id = Some(9);
        assert_eq!(meta.state(), MappingState::Restricted);

        meta.deleted_at = Some(chrono::Utc::now());
        assert_eq!(meta.state(), MappingState::SoftDeleted);
    }

    #[test]
    fn collection_names_carry_the_marker() {
        let name = restricted_collection_name("Sykefravær");
        assert!(has_restricted_tag(name.as_str()));
        assert!(!has_restricted_tag("Sykefravær"));
    }

    #[test]
    fn service_account_id_fits_iam_limits() {
        let account_id = service_account_id(DatasetId::new());
        assert_eq!(account_id.len(), 30);
        assert!(account_id.starts_with("nada-"));
    }

    proptest! {
        #[test]
        fn permission_group_name_is_a_slug(name in "[A-Za-z0-9 _()-]{1,40}") {
            let slug = permission_group_name(name.as_str());
            prop_assert!(!slug.contains(' '));
            prop_assert!(!slug.contains('_'));
            prop_assert_eq!(slug.to_lowercase(), slug.clone());
        }
    }
}
