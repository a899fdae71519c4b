//! Error types for dedupe-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database errors (SQLite)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Document not found
    DocumentNotFound,
    /// Duplicate group not found
    GroupNotFound,
    /// Analysis run not found
    RunNotFound,
    /// Batch operation not found
    OperationNotFound,
    /// AI job not found
    JobNotFound,
    /// Duplicate upstream id on insert
    Conflict,
    /// Transaction errors
    Transaction,
    /// Configuration errors
    Config,
    /// I/O errors
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::DocumentNotFound => "document_not_found",
            ErrorKind::GroupNotFound => "group_not_found",
            ErrorKind::RunNotFound => "run_not_found",
            ErrorKind::OperationNotFound => "operation_not_found",
            ErrorKind::JobNotFound => "job_not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }

    /// True for the entity-lookup-miss kinds.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ErrorKind::DocumentNotFound
                | ErrorKind::GroupNotFound
                | ErrorKind::RunNotFound
                | ErrorKind::OperationNotFound
                | ErrorKind::JobNotFound
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
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
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn document_not_found(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::DocumentNotFound,
            format!("Document not found: {id}"),
        )
    }

    pub fn group_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorKind::GroupNotFound, format!("Group not found: {id}"))
    }

    pub fn run_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorKind::RunNotFound, format!("Analysis run not found: {id}"))
    }

    pub fn operation_not_found(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::OperationNotFound,
            format!("Batch operation not found: {id}"),
        )
    }

    pub fn job_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorKind::JobNotFound, format!("AI job not found: {id}"))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }
}

// SQLite error conversions
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        // Unique-constraint violations surface as Conflict so callers can
        // report them without retrying.
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return StorageError::conflict(format!("constraint violation: {err}"))
                    .with_source(err);
            }
        }
        StorageError::database(format!("SQLite error: {err}")).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {err}")).with_source(err)
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::serialization(format!("bincode error: {err}")).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
