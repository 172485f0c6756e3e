//! Autoscaler error types.

use thiserror::Error;

use voxgrid_affinity::AffinityError;

/// Result type alias for control loop operations.
pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

/// Failures observed by the control loop.
///
/// Only `Affinity` stops the loop; the other variants are recovered
/// within the tick and reported in its `TickReport`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutoscaleError {
    #[error("telemetry unavailable for {service}: {reason}")]
    TelemetryUnavailable { service: String, reason: String },

    #[error("failed to scale {service} to {target}: {reason}")]
    ApplyFailure {
        service: String,
        target: u32,
        reason: String,
    },

    #[error("affinity computation failed: {0}")]
    Affinity(#[from] AffinityError),
}

impl AutoscaleError {
    /// Service the failure belongs to, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            AutoscaleError::TelemetryUnavailable { service, .. }
            | AutoscaleError::ApplyFailure { service, .. } => Some(service),
            AutoscaleError::Affinity(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AutoscaleError::Affinity(_))
    }
}
