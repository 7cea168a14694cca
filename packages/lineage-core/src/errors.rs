//! Error types for lineage-core
//!
//! Every operation returns an explicit `Result`; there is no partial-success
//! outcome. The `ErrorKind` string form is stable so external callers (the
//! CLI collaborator) can branch on failure class.

use std::fmt;
use thiserror::Error;

/// Lineage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced id does not exist
    NotFound,
    /// Uniqueness constraint violated (dataset `(name, version)` or id collision)
    Duplicate,
    /// A write referenced a non-existent parent entity
    Reference,
    /// Operation violates entity lifecycle (e.g. metric on an ended run)
    InvalidState,
    /// Stage change violates the lifecycle state machine
    InvalidTransition,
    /// Input record failed field validation before any write was attempted
    Validation,
    /// Persistence backend unreachable or failed mid-operation
    BackendUnavailable,
    /// Serialization/deserialization errors
    Serialization,
    /// Internal errors (bugs)
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Reference => "reference",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Validation => "validation",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lineage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct LineageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl LineageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("{} not found: {}", entity, id.into()),
        )
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reference, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTransition, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

// SQLite error conversions. Constraint violations surface as `Duplicate` so
// callers can retry creation calls idempotently against the uniqueness key.
impl From<rusqlite::Error> for LineageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                LineageError::duplicate(format!("uniqueness constraint violated: {}", err))
                    .with_source(err)
            }
            rusqlite::Error::FromSqlConversionFailure(..) => {
                LineageError::serialization(format!("corrupt column value: {}", err))
                    .with_source(err)
            }
            _ => LineageError::backend(format!("SQLite error: {}", err)).with_source(err),
        }
    }
}

// JSON error conversions
impl From<serde_json::Error> for LineageError {
    fn from(err: serde_json::Error) -> Self {
        LineageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, LineageError>;
