//! Errors and their operational classification.

use thiserror::Error;

use crate::domain::JobStatus;

/// Operational classification of a pipeline error.
///
/// - TransientDependency: parser/network/service unavailable (retry via queue backoff)
/// - PermanentInput: malformed or unreadable job input (fail immediately)
/// - Persistence: store/artifact/queue failure (abort the operation, keep running)
/// - Timeout: parser call timeout and stuck-processing detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientDependency,
    PermanentInput,
    Persistence,
    Timeout,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("dependency unavailable: {0}")]
    TransientDependency(String),

    #[error("invalid input: {0}")]
    PermanentInput(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::TransientDependency(_) => ErrorKind::TransientDependency,
            PipelineError::PermanentInput(_) => ErrorKind::PermanentInput,
            PipelineError::Persistence(_) => ErrorKind::Persistence,
            PipelineError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Whether the queue should re-deliver the task after a backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::PermanentInput(_))
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Persistence(err.to_string())
    }
}

/// Job store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("corrupt job row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Configuration error (fail fast at boot).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Parse {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}
