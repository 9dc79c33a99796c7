use std::str::FromStr;

use chrono::{DateTime, Utc};
use nada_core::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DataproductId, DatasetId};

/// Personal data classification of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiLevel {
    /// No personal data.
    None,
    /// Personal data that has been anonymised.
    Anonymised,
    /// Sensitive personal data; may never be shared with everyone.
    Sensitive,
}

impl PiiLevel {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Anonymised => "anonymised",
            Self::Sensitive => "sensitive",
        }
    }
}

impl FromStr for PiiLevel {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Self::None),
            "anonymised" => Ok(Self::Anonymised),
            "sensitive" => Ok(Self::Sensitive),
            _ => Err(AppError::Internal(format!("unknown pii level '{value}'"))),
        }
    }
}

/// Catalog entry pointing at one BigQuery table or view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Stable dataset identifier.
    pub id: DatasetId,
    /// Owning dataproduct.
    pub dataproduct_id: DataproductId,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Personal data classification.
    pub pii: PiiLevel,
}

/// Ownership information of a dataproduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Email of the owning group; members may administer access.
    pub group: String,
    /// Slack channel used for notifications.
    pub team_contact: Option<String>,
    /// Team identifier in the team catalog.
    pub team_id: Option<String>,
}

/// Named grouping of datasets owned by one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataproduct {
    /// Stable dataproduct identifier.
    pub id: DataproductId,
    /// Display name.
    pub name: String,
    /// Owner information.
    pub owner: Owner,
}

/// BigQuery datasource backing a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigQuery {
    /// Datasource identifier.
    pub id: Uuid,
    /// Dataset this datasource belongs to.
    pub dataset_id: DatasetId,
    /// GCP project hosting the table.
    pub project_id: String,
    /// BigQuery dataset name.
    pub dataset: String,
    /// BigQuery table name.
    pub table: String,
    /// BigQuery table type (`TABLE`, `VIEW`, ...).
    pub table_type: String,
    /// Columns pseudonymised in an associated view.
    pub pseudo_columns: Vec<String>,
    /// Set when a sync found the underlying table gone.
    pub missing_since: Option<DateTime<Utc>>,
}

impl BigQuery {
    /// Returns whether joinable views derived from this table need grants too.
    #[must_use]
    pub fn has_pseudo_columns(&self) -> bool {
        !self.pseudo_columns.is_empty()
    }

    /// Returns the name a joinable view over this table gets in its view dataset.
    #[must_use]
    pub fn joinable_view_name(&self) -> String {
        format!("{}_{}_{}", self.project_id, self.dataset, self.table).replace('-', "_")
    }
}

/// View joining a pseudonymised dataset with others through a shared salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinableView {
    /// Joinable view identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// BigQuery dataset, in the central project, holding the view tables.
    pub bigquery_dataset: String,
}
