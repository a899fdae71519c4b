use thiserror::Error;

use dedupe_storage::StorageError;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine-level error taxonomy. The adapter layer maps these to transport
/// status codes; inside the engine the split that matters is transient
/// (retry) versus permanent (record against the item and continue).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation already running: {0}")]
    AlreadyRunning(&'static str),

    /// 5xx / 429 / transport failure; retried per the backoff policy.
    #[error("Upstream transient error{}: {message}", status_suffix(.status))]
    UpstreamTransient {
        status: Option<u16>,
        message: String,
    },

    /// 4xx other than 429; recorded against the item and skipped.
    #[error("Upstream permanent error ({status}): {message}")]
    UpstreamPermanent { status: u16, message: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl EngineError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn conflict(what: impl std::fmt::Display) -> Self {
        Self::Conflict(what.to_string())
    }

    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::UpstreamTransient {
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamPermanent {
            status,
            message: message.into(),
        }
    }

    /// True for errors the upstream retry policy should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::UpstreamTransient { .. })
    }
}

impl From<dedupe_core::CoreError> for EngineError {
    fn from(err: dedupe_core::CoreError) -> Self {
        match err {
            dedupe_core::CoreError::InvalidConfig(msg) => EngineError::InvalidConfig(msg),
            dedupe_core::CoreError::InvalidPartition { .. } => {
                EngineError::InvalidConfig(err.to_string())
            }
            other => EngineError::Internal(anyhow::Error::new(other)),
        }
    }
}
