//! Caller-facing error taxonomy for repositories, units of work and services.
//!
//! # Invariants
//! - Validation and not-found failures stay distinct from argument/state
//!   failures so callers can branch on them.
//! - Nothing here is retried; retry policy belongs to the caller.

use crate::model::validation::ValidationErrorSet;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    /// One or more field constraints were violated.
    Validation(ValidationErrorSet),
    NotFound { collection: String, id: String },
    /// Transaction API misuse or use of a disposed unit of work.
    InvalidState(String),
    Argument(String),
    /// The store failed while committing; the unit of work is unusable for
    /// the current transaction.
    FatalStore(StoreError),
    Store(StoreError),
    Cancelled,
}

impl RepoError {
    /// Returns whether the caller can retry with corrected input.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound { .. })
    }

    /// Returns the aggregated field errors for validation failures.
    pub fn validation_errors(&self) -> Option<&ValidationErrorSet> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(errors) => write!(f, "{errors}"),
            Self::NotFound { collection, id } => {
                write!(f, "entity not found: {collection}/{id}")
            }
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
            Self::Argument(message) => write!(f, "invalid argument: {message}"),
            Self::FatalStore(err) => write!(f, "fatal store error: {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(errors) => Some(errors),
            Self::FatalStore(err) | Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationErrorSet> for RepoError {
    fn from(value: ValidationErrorSet) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Validation(errors) => Self::Validation(errors),
            StoreError::MissingRow { collection, key } => Self::NotFound {
                collection,
                id: key,
            },
            StoreError::InvalidCollection(name) => {
                Self::Argument(format!("invalid collection name `{name}`"))
            }
            StoreError::Closed => Self::invalid_state("store session is closed"),
            StoreError::Busy => Self::invalid_state("store session is in use"),
            StoreError::Cancelled => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}
