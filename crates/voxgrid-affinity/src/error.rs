//! Affinity allocator error types.

use thiserror::Error;

/// Result type alias for affinity computations.
pub type AffinityResult<T> = Result<T, AffinityError>;

/// Broken allocator invariants.
///
/// These cannot happen for valid input; callers treat them as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AffinityError {
    #[error("worker {0} was left without cores")]
    EmptyCoreSet(String),

    #[error("core {core} out of range for {total_cores} usable cores")]
    CoreOutOfRange { core: usize, total_cores: usize },

    #[error("cores {missing:?} are not assigned to any worker")]
    UncoveredCores { missing: Vec<usize> },

    #[error("cores shared between workers while {total_cores} cores cover {workers} workers")]
    UnexpectedOverlap { total_cores: usize, workers: usize },

    #[error("worker listed twice: {0}")]
    DuplicateWorker(String),
}
