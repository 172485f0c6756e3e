//! voxgrid-metrics: telemetry in and out of the autoscaler.
//!
//! Pulls per-service scaling signals (queue depth, CPU, p95 processing
//! time) through the `MetricSource` trait and records what the
//! autoscaler did for Prometheus-compatible text exposition.
//!
//! # Architecture
//!
//! ```text
//! MetricSource (trait)
//!   ├── PrometheusSource  ← instant queries against a Prometheus server
//!   └── InMemorySource    ← settable snapshots, injected failures
//!
//! ScalerTelemetry
//!   ├── set_instances() / record_scale_action() ← called by the control loop
//!   └── snapshot() → render_prometheus() → text/plain for /metrics
//! ```

pub mod collector;
pub mod memory;
pub mod prometheus;
pub mod query;
pub mod source;

pub use collector::{ScalerTelemetry, TelemetrySnapshot};
pub use memory::InMemorySource;
pub use prometheus::render_prometheus;
pub use query::{PrometheusSource, ServiceQueries};
pub use source::{MetricSource, SourceError, SourceResult};
