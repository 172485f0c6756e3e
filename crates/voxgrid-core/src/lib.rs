//! voxgrid-core: shared vocabulary for the VoxGrid autoscaler.
//!
//! Holds the domain types exchanged between the metric sources, the
//! scaling policy, the affinity allocator, and the worker pool
//! controllers, plus the immutable `AutoscaleConfig` built once at
//! startup from environment-style key/value pairs.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::{AutoscaleConfig, CooldownConfig, RetryConfig, ServiceBounds, ThresholdConfig};
pub use error::{ConfigError, ConfigResult};
pub use retry::{backoff_for_attempt, retry_budget, retry_with_backoff, retry_with_backoff_when};
pub use types::*;
