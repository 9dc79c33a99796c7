use std::fmt::{Display, Formatter};
use std::str::FromStr;

use nada_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Kind of principal an access subject refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectType {
    /// A single person, identified by email.
    #[serde(rename = "user")]
    User,
    /// A Google group, identified by group email.
    #[serde(rename = "group")]
    Group,
    /// A GCP service account, identified by its email.
    #[serde(rename = "serviceAccount")]
    ServiceAccount,
}

impl SubjectType {
    /// Returns the stable prefix used in `"type:identifier"` strings.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::ServiceAccount => "serviceAccount",
        }
    }
}

impl FromStr for SubjectType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            "serviceAccount" => Ok(Self::ServiceAccount),
            _ => Err(AppError::InvalidRequest(format!(
                "unknown subject type '{value}'"
            ))),
        }
    }
}

/// Access principal in the form `"type:identifier"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    subject_type: SubjectType,
    identifier: String,
}

impl Subject {
    /// Creates a subject, normalizing the identifier to lowercase.
    pub fn new(subject_type: SubjectType, identifier: impl Into<String>) -> AppResult<Self> {
        let identifier = identifier.into().trim().to_lowercase();
        if identifier.is_empty() {
            return Err(AppError::InvalidRequest(
                "subject identifier must not be empty".to_owned(),
            ));
        }

        if identifier.contains(':') {
            return Err(AppError::InvalidRequest(format!(
                "subject identifier '{identifier}' must not contain ':'"
            )));
        }

        Ok(Self {
            subject_type,
            identifier,
        })
    }

    /// Creates a user subject.
    pub fn user(email: impl Into<String>) -> AppResult<Self> {
        Self::new(SubjectType::User, email)
    }

    /// Creates a group subject.
    pub fn group(email: impl Into<String>) -> AppResult<Self> {
        Self::new(SubjectType::Group, email)
    }

    /// Parses a `"type:identifier"` string.
    pub fn parse(value: &str) -> AppResult<Self> {
        let (subject_type, identifier) = value.split_once(':').ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "subject '{value}' must have the form 'type:identifier'"
            ))
        })?;

        Self::new(SubjectType::from_str(subject_type)?, identifier)
    }

    /// Returns the subject type.
    #[must_use]
    pub fn subject_type(&self) -> SubjectType {
        self.subject_type
    }

    /// Returns the identifier without type prefix.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.identifier.as_str()
    }

    /// Returns true when this is the group subject for the given group email.
    #[must_use]
    pub fn is_group(&self, group_email: &str) -> bool {
        self.subject_type == SubjectType::Group && self.identifier.eq_ignore_ascii_case(group_email)
    }
}

impl Display for Subject {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}:{}",
            self.subject_type.as_str(),
            self.identifier
        )
    }
}

impl Serialize for Subject {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Subject {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(value.as_str()).map_err(serde::de::Error::custom)
    }
}
