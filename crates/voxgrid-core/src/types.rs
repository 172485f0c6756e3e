//! Domain types shared by every VoxGrid crate.
//!
//! Timestamps are Unix epoch seconds (`u64`), matching what the metric
//! sources report and what the cooldown tracker compares against.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Name of a scalable service ("asr", "translator", ...).
pub type ServiceName = String;

/// Identifier of one worker of a service (`<service>-<n>`, 1-based).
pub type WorkerId = String;

/// Index of a CPU core as seen by the host scheduler.
pub type CoreIndex = usize;

// ── Services ───────────────────────────────────────────────────────

/// Bounds and live instance count of one service.
///
/// `min_instances <= current_instances <= max_instances` holds at every
/// observable point; it is broken only while a scale action is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: ServiceName,
    pub min_instances: u32,
    pub max_instances: u32,
    pub current_instances: u32,
}

impl ServiceSpec {
    /// Whether the current count sits inside `[min, max]`.
    pub fn within_bounds(&self) -> bool {
        self.min_instances <= self.current_instances
            && self.current_instances <= self.max_instances
    }

    /// Worker IDs for the current membership, in instance order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        (1..=self.current_instances)
            .map(|n| worker_id(&self.name, n))
            .collect()
    }
}

/// Build the worker ID of instance `n` (1-based) of `service`.
pub fn worker_id(service: &str, n: u32) -> WorkerId {
    format!("{service}-{n}")
}

// ── Telemetry ──────────────────────────────────────────────────────

/// One sample of the three scaling signals for a service.
///
/// Each signal is optional: `None` means the backend had no value for it.
/// NaN and negative readings are treated the same as `None` by the
/// accessor methods, so a bad reading never triggers scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub service: ServiceName,
    /// Messages pending in the service's work queue.
    pub queue_depth: Option<u64>,
    /// CPU utilization averaged over the sampling window (0–100+).
    pub cpu_percent: Option<f64>,
    /// Recent 95th-percentile processing time in seconds.
    pub p95_processing_time_secs: Option<f64>,
    /// Unix timestamp (seconds) of the observation.
    pub observed_at: u64,
}

impl MetricSnapshot {
    /// A snapshot carrying no signal at all.
    ///
    /// Substituted when the source is unreachable; it can trigger neither
    /// a scale-up nor a scale-down.
    pub fn unknown(service: &str, observed_at: u64) -> Self {
        Self {
            service: service.to_string(),
            queue_depth: None,
            cpu_percent: None,
            p95_processing_time_secs: None,
            observed_at,
        }
    }

    pub fn queue_depth(&self) -> Option<u64> {
        self.queue_depth
    }

    pub fn cpu_percent(&self) -> Option<f64> {
        usable(self.cpu_percent)
    }

    pub fn p95_processing_time_secs(&self) -> Option<f64> {
        usable(self.p95_processing_time_secs)
    }

    /// True when no signal carries a usable value.
    pub fn is_unknown(&self) -> bool {
        self.queue_depth().is_none()
            && self.cpu_percent().is_none()
            && self.p95_processing_time_secs().is_none()
    }
}

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

// ── Decisions ──────────────────────────────────────────────────────

/// What a scaling decision asks the pool to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    NoOp,
}

impl ScaleAction {
    /// Label used for the `direction` dimension of emitted telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleAction::ScaleUp => "up",
            ScaleAction::ScaleDown => "down",
            ScaleAction::NoOp => "none",
        }
    }
}

/// Why the policy produced a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScaleReason {
    /// Current count below the configured minimum (bounds repair).
    BelowMinimum,
    /// Current count above the configured maximum (bounds repair).
    AboveMaximum,
    QueueHigh { depth: u64 },
    CpuHigh { percent: f64 },
    ProcessingTimeHigh { seconds: f64 },
    /// Queue and CPU both at or under their low thresholds.
    LoadLow,
    /// Scale-up triggered, but the scale-up cooldown is still running.
    ScaleUpCooldown { remaining_secs: u64 },
    /// Scale-down triggered, but the scale-down cooldown is still running.
    ScaleDownCooldown { remaining_secs: u64 },
    /// Scale-up triggered while already at the maximum.
    AtMaximum,
    /// Scale-down triggered while already at the minimum.
    AtMinimum,
    /// No usable signal was available.
    TelemetryUnknown,
    /// Nothing triggered.
    Steady,
}

impl fmt::Display for ScaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleReason::BelowMinimum => write!(f, "instance count below minimum"),
            ScaleReason::AboveMaximum => write!(f, "instance count above maximum"),
            ScaleReason::QueueHigh { depth } => write!(f, "queue depth {depth} at or above threshold"),
            ScaleReason::CpuHigh { percent } => write!(f, "cpu {percent:.1}% at or above threshold"),
            ScaleReason::ProcessingTimeHigh { seconds } => {
                write!(f, "p95 processing time {seconds:.2}s at or above threshold")
            }
            ScaleReason::LoadLow => write!(f, "queue and cpu at or below low thresholds"),
            ScaleReason::ScaleUpCooldown { remaining_secs } => {
                write!(f, "scale-up cooldown active ({remaining_secs}s left)")
            }
            ScaleReason::ScaleDownCooldown { remaining_secs } => {
                write!(f, "scale-down cooldown active ({remaining_secs}s left)")
            }
            ScaleReason::AtMaximum => write!(f, "already at maximum instances"),
            ScaleReason::AtMinimum => write!(f, "already at minimum instances"),
            ScaleReason::TelemetryUnknown => write!(f, "no usable telemetry"),
            ScaleReason::Steady => write!(f, "load within thresholds"),
        }
    }
}

/// An immutable record of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub service: ServiceName,
    pub action: ScaleAction,
    pub from_count: u32,
    pub to_count: u32,
    pub reason: ScaleReason,
    /// Unix timestamp (seconds) of the evaluation.
    pub decided_at: u64,
}

impl ScalingDecision {
    /// A decision that leaves the count unchanged.
    pub fn no_op(service: &str, count: u32, reason: ScaleReason, decided_at: u64) -> Self {
        Self {
            service: service.to_string(),
            action: ScaleAction::NoOp,
            from_count: count,
            to_count: count,
            reason,
            decided_at,
        }
    }

    pub fn is_no_op(&self) -> bool {
        self.action == ScaleAction::NoOp
    }
}

// ── Cooldown ───────────────────────────────────────────────────────

/// Last applied scale action per direction for one service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CooldownState {
    pub service: ServiceName,
    pub last_scale_up_at: Option<u64>,
    pub last_scale_down_at: Option<u64>,
}

impl CooldownState {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            last_scale_up_at: None,
            last_scale_down_at: None,
        }
    }
}

// ── Affinity ───────────────────────────────────────────────────────

/// Cores a single worker is pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityAssignment {
    pub worker_id: WorkerId,
    pub core_set: BTreeSet<CoreIndex>,
}

impl AffinityAssignment {
    /// Render the core set as a cpuset list, e.g. `0-3` or `0,2,5-6`.
    pub fn cpuset(&self) -> String {
        let mut parts = Vec::new();
        let mut iter = self.core_set.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if start == end {
                parts.push(start.to_string());
            } else {
                parts.push(format!("{start}-{end}"));
            }
        }
        parts.join(",")
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
