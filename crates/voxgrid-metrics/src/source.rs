//! The pull-style telemetry contract consumed by the control loop.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use voxgrid_core::MetricSnapshot;

/// Result type alias for metric queries.
pub type SourceResult<T> = Result<T, SourceError>;

/// Why a metric query produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("metrics backend unreachable: {0}")]
    Unreachable(String),

    #[error("metrics query timed out")]
    Timeout,

    #[error("metrics backend returned HTTP {0}")]
    Status(u16),

    #[error("malformed metrics response: {0}")]
    BadResponse(String),

    #[error("invalid metrics endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Source of per-service scaling signals.
///
/// `Ok(None)` means the backend answered but had no data for the service;
/// `Err` means it could not be asked at all. The control loop treats both
/// as "unknown" for that service only.
pub trait MetricSource: Send + Sync {
    fn sample(
        &self,
        service: &str,
    ) -> impl Future<Output = SourceResult<Option<MetricSnapshot>>> + Send;
}

impl<S: MetricSource> MetricSource for Arc<S> {
    fn sample(
        &self,
        service: &str,
    ) -> impl Future<Output = SourceResult<Option<MetricSnapshot>>> + Send {
        (**self).sample(service)
    }
}
