//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while building or validating `AutoscaleConfig`.
///
/// Every variant is startup-fatal: the daemon refuses to run with an
/// inconsistent configuration instead of clamping values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{low_key} ({low}) must be lower than {high_key} ({high})")]
    ThresholdOrder {
        low_key: &'static str,
        high_key: &'static str,
        low: String,
        high: String,
    },

    #[error("service {service}: min instances must be at least 1")]
    MinInstancesZero { service: String },

    #[error("service {service}: min instances ({min}) exceeds max instances ({max})")]
    BoundsInverted { service: String, min: u32, max: u32 },

    #[error("{key} ({timeout_secs:.1}s) must be shorter than the check interval ({interval_secs}s)")]
    TimeoutTooLong {
        key: &'static str,
        timeout_secs: f64,
        interval_secs: u64,
    },

    #[error("{key} with retries may take {budget_secs:.1}s, which must be shorter than {limit_key} ({limit_secs:.1}s)")]
    RetryBudgetTooLong {
        key: &'static str,
        budget_secs: f64,
        limit_key: &'static str,
        limit_secs: f64,
    },

    #[error("no services configured")]
    NoServices,

    #[error("service listed twice: {0}")]
    DuplicateService(String),

    #[error("{0}")]
    Constraint(String),

    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
