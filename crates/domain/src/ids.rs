use std::fmt::{Display, Formatter};
use std::str::FromStr;

use nada_core::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID value.
            #[must_use]
            pub fn from_uuid(value: Uuid) -> Self {
                Self(value)
            }

            /// Returns the underlying UUID value.
            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(value).map(Self).map_err(|error| {
                    AppError::InvalidRequest(format!(
                        "invalid {} '{value}': {error}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

uuid_id!(
    /// Identifier of a catalog dataset.
    DatasetId
);
uuid_id!(
    /// Identifier of a dataproduct.
    DataproductId
);
uuid_id!(
    /// Identifier of a granted access row.
    AccessId
);
uuid_id!(
    /// Identifier of an access request.
    AccessRequestId
);

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::DatasetId;

    #[test]
    fn dataset_id_parses_display_output() {
        let id = DatasetId::new();
        assert_eq!(DatasetId::from_str(id.to_string().as_str()), Ok(id));
    }

    #[test]
    fn dataset_id_rejects_garbage() {
        assert!(DatasetId::from_str("not-a-uuid").is_err());
    }
}
