//! Worker pool error types.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Failures reported by a `WorkerPoolController`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("service not managed by this pool: {0}")]
    UnknownService(String),

    #[error("{service}: stopped at {applied} of {target} instances: {reason}")]
    Incomplete {
        service: String,
        target: u32,
        applied: u32,
        reason: String,
    },

    #[error("{service}: scale request rejected: {reason}")]
    Rejected { service: String, reason: String },

    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("command `{0}` timed out")]
    Timeout(String),
}

impl PoolError {
    /// Instance count actually reached, when the pool knows it.
    pub fn applied(&self) -> Option<u32> {
        match self {
            PoolError::Incomplete { applied, .. } => Some(*applied),
            _ => None,
        }
    }
}
