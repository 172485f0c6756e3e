//! voxgrid-autoscale: threshold-driven instance scaling.
//!
//! One `ControlLoop` per process. Every tick it samples each service,
//! asks the pure `ScalingPolicy` for a decision, applies non-trivial
//! decisions one at a time through the worker pool, and repins every
//! worker when membership changed.
//!
//! ```text
//!   Idle ──► Sampling ──► Deciding ──► Applying ──► Idle
//!             │             │            │
//!   MetricSource      ScalingPolicy   WorkerPoolController
//!   (bounded fan-out) (no state)      (sequential) + assign()
//! ```
//!
//! # Decision rules (first match wins)
//!
//! ```text
//! current < min                          → ScaleUp to min   (ignores cooldown)
//! current > max                          → ScaleDown to max (ignores cooldown)
//! queue ≥ qHigh OR cpu ≥ cHigh OR p95 ≥ pHigh
//!     and current < max and up-cooldown elapsed   → ScaleUp by step
//! queue ≤ qLow AND cpu ≤ cLow AND p95 < pHigh (sustained)
//!     and current > min and down-cooldown elapsed → ScaleDown by step
//! otherwise                              → NoOp
//! ```
//!
//! Cooldowns only move when an action is applied successfully, so a
//! failed apply is retried on the next tick.

pub mod control_loop;
pub mod cooldown;
pub mod error;
pub mod history;
pub mod policy;

pub use control_loop::{ControlLoop, LoopPhase, TickReport};
pub use cooldown::CooldownTracker;
pub use error::{AutoscaleError, AutoscaleResult};
pub use history::SnapshotWindow;
pub use policy::ScalingPolicy;
