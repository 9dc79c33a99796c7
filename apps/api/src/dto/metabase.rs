use chrono::{DateTime, Utc};
use nada_domain::{DatasetId, ThirdPartyMapping};
use serde::{Deserialize, Serialize};

/// Desired third-party services of a dataset.
#[derive(Debug, Deserialize)]
pub struct MapDatasetRequest {
    pub services: Vec<String>,
}

/// API representation of a dataset's third-party mapping.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThirdPartyMappingResponse {
    pub dataset_id: DatasetId,
    pub services: Vec<String>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<ThirdPartyMapping> for ThirdPartyMappingResponse {
    fn from(value: ThirdPartyMapping) -> Self {
        Self {
            dataset_id: value.dataset_id,
            services: value.services,
            updated_at: value.updated_at,
            processed_at: value.processed_at,
        }
    }
}
