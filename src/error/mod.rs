//! Error types and handlers for replication operations

pub mod handlers;

use std::time::Duration;

pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Every failure the engine can observe.
///
/// Payloads are plain strings so that an error can be stored in a
/// [`SyncResult`](crate::sync::SyncResult) and cloned into the run-level
/// stop-on-error error at the same time.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplicationError {
    /// Network hiccups, registry 5xx, rate limiting. Retried per policy.
    #[error("Transient error: {0}")]
    Transient(String),

    /// A task exceeded its time budget.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Destination rejected the write, invalid reference, missing image.
    /// Never retried.
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// The run was cancelled before this unit of work could finish.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration that could not be normalized.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Checkpoint persistence problems
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Illegal repository status change inside a checkpoint
    #[error("Invalid status transition for {repository}: {from} -> {to}")]
    InvalidTransition {
        repository: String,
        from: String,
        to: String,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registry collaborator errors
    #[error("Registry error: {0}")]
    Registry(String),

    /// Worker pool lifecycle errors
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// File IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// JSON encoding or decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Raised by the batch executor when stop-on-error halts a run.
    #[error("Replication halted after task {task} failed: {source}")]
    StopOnError {
        task: String,
        #[source]
        source: Box<ReplicationError>,
    },
}

impl ReplicationError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReplicationError::Transient(_)
                | ReplicationError::Timeout(_)
                | ReplicationError::Io(_)
                | ReplicationError::Registry(_)
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ReplicationError::Cancelled(_))
    }

    /// Short, stable label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicationError::Transient(_) => "transient",
            ReplicationError::Timeout(_) => "timeout",
            ReplicationError::Permanent(_) => "permanent",
            ReplicationError::Cancelled(_) => "cancelled",
            ReplicationError::Configuration(_) => "configuration",
            ReplicationError::Checkpoint(_) => "checkpoint",
            ReplicationError::InvalidTransition { .. } => "invalid_transition",
            ReplicationError::NotFound(_) => "not_found",
            ReplicationError::Registry(_) => "registry",
            ReplicationError::Pool(_) => "pool",
            ReplicationError::Io(_) => "io",
            ReplicationError::Serialization(_) => "serialization",
            ReplicationError::StopOnError { .. } => "stop_on_error",
        }
    }
}

impl From<std::io::Error> for ReplicationError {
    fn from(err: std::io::Error) -> Self {
        ReplicationError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ReplicationError {
    fn from(err: serde_json::Error) -> Self {
        ReplicationError::Serialization(err.to_string())
    }
}

impl From<regex::Error> for ReplicationError {
    fn from(err: regex::Error) -> Self {
        ReplicationError::Configuration(format!("Invalid pattern: {}", err))
    }
}

impl From<crate::concurrency::ConcurrencyError> for ReplicationError {
    fn from(err: crate::concurrency::ConcurrencyError) -> Self {
        ReplicationError::Pool(err.to_string())
    }
}
