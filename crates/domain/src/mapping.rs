use chrono::{DateTime, Utc};
use nada_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::DatasetId;

/// Name of the Metabase third-party service.
pub const METABASE_SERVICE: &str = "metabase";

const KNOWN_SERVICES: &[&str] = &[METABASE_SERVICE];

/// Desired third-party services for one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirdPartyMapping {
    /// Dataset being mapped.
    pub dataset_id: DatasetId,
    /// Services the dataset should be exposed in.
    pub services: Vec<String>,
    /// Last time the desired services changed.
    pub updated_at: DateTime<Utc>,
    /// Version of `updated_at` that was last mapped successfully.
    pub processed_at: Option<DateTime<Utc>>,
}

impl ThirdPartyMapping {
    /// Returns whether Metabase is among the desired services.
    #[must_use]
    pub fn includes_metabase(&self) -> bool {
        self.services.iter().any(|service| service == METABASE_SERVICE)
    }

    /// Returns whether the current desired state was already mapped.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.processed_at
            .is_some_and(|processed_at| processed_at >= self.updated_at)
    }
}

/// Validates and deduplicates requested service names.
pub fn validate_services(services: &[String]) -> AppResult<Vec<String>> {
    let mut validated: Vec<String> = Vec::with_capacity(services.len());
    for service in services {
        let service = service.trim();
        if !KNOWN_SERVICES.contains(&service) {
            return Err(AppError::InvalidRequest(format!(
                "unknown third-party service '{service}'"
            )));
        }

        if !validated.iter().any(|existing| existing == service) {
            validated.push(service.to_owned());
        }
    }

    Ok(validated)
}
