//! Shared primitives for all Rust crates in the nada backend.

#![forbid(unsafe_code)]

/// Authentication primitives shared across services.
pub mod auth;

use thiserror::Error;

pub use auth::{Group, User};

/// Result type used across nada crates.
pub type AppResult<T> = Result<T, AppError>;

/// Common application error kinds.
///
/// The kind is what callers branch on; the message carries the operation
/// trail added by [`AppError::with_op`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Requested resource does not exist.
    #[error("not exist: {0}")]
    NotExist(String),

    /// Principal is not allowed to perform the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller violated a business invariant.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An external API call failed.
    #[error("io error: {0}")]
    Io(String),

    /// Storage layer failure.
    #[error("database error: {0}")]
    Database(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Prefixes the error message with an operation tag, keeping the kind.
    #[must_use]
    pub fn with_op(self, op: &str) -> Self {
        match self {
            Self::NotExist(message) => Self::NotExist(format!("{op}: {message}")),
            Self::Unauthorized(message) => Self::Unauthorized(format!("{op}: {message}")),
            Self::InvalidRequest(message) => Self::InvalidRequest(format!("{op}: {message}")),
            Self::Io(message) => Self::Io(format!("{op}: {message}")),
            Self::Database(message) => Self::Database(format!("{op}: {message}")),
            Self::Internal(message) => Self::Internal(format!("{op}: {message}")),
        }
    }

    /// Returns true for the `NotExist` kind.
    #[must_use]
    pub fn is_not_exist(&self) -> bool {
        matches!(self, Self::NotExist(_))
    }

    /// Returns the stable kind name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotExist(_) => "not_exist",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Io(_) => "io",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
        }
    }
}

/// Attaches an operation tag to the error side of a result.
pub trait ResultExt<T> {
    /// Tags the error with `op`, see [`AppError::with_op`].
    fn op(self, op: &str) -> AppResult<T>;
}

impl<T> ResultExt<T> for AppResult<T> {
    fn op(self, op: &str) -> AppResult<T> {
        self.map_err(|error| error.with_op(op))
    }
}
