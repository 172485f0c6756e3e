//! Telemetry collector: what the autoscaler did.
//!
//! Counters and gauges live behind one `RwLock`; the control loop is the
//! only writer, while `/metrics` readers take consistent snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use voxgrid_core::ScaleAction;

/// Point-in-time copy of every emitted series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// service → current instance count.
    pub instances: BTreeMap<String, u32>,
    /// (service, direction) → applied scale actions.
    pub scale_actions: BTreeMap<(String, String), u64>,
    /// worker → cores in its affinity set (0 when unpinned).
    pub affinity_cores: BTreeMap<String, usize>,
    /// service → failed apply attempts.
    pub apply_failures: BTreeMap<String, u64>,
    /// service → ticks where telemetry was unavailable.
    pub telemetry_gaps: BTreeMap<String, u64>,
}

/// Shared, cloneable registry of autoscaler telemetry.
#[derive(Debug, Clone, Default)]
pub struct ScalerTelemetry {
    state: Arc<RwLock<TelemetrySnapshot>>,
}

impl ScalerTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance gauge of a service.
    pub async fn set_instances(&self, service: &str, count: u32) {
        let mut state = self.state.write().await;
        state.instances.insert(service.to_string(), count);
    }

    /// Count an applied scale action. `NoOp` is ignored.
    pub async fn record_scale_action(&self, service: &str, action: ScaleAction) {
        if action == ScaleAction::NoOp {
            return;
        }
        let mut state = self.state.write().await;
        *state
            .scale_actions
            .entry((service.to_string(), action.as_str().to_string()))
            .or_insert(0) += 1;
    }

    pub async fn record_apply_failure(&self, service: &str) {
        let mut state = self.state.write().await;
        *state.apply_failures.entry(service.to_string()).or_insert(0) += 1;
    }

    pub async fn record_telemetry_gap(&self, service: &str) {
        let mut state = self.state.write().await;
        *state.telemetry_gaps.entry(service.to_string()).or_insert(0) += 1;
    }

    /// Replace the per-worker affinity gauges wholesale.
    ///
    /// Workers missing from `workers` are dropped from the exposition.
    pub async fn set_affinity<I>(&self, workers: I)
    where
        I: IntoIterator<Item = (String, usize)>,
    {
        let mut state = self.state.write().await;
        state.affinity_cores = workers.into_iter().collect();
        debug!(workers = state.affinity_cores.len(), "affinity gauges replaced");
    }

    /// Copy every series.
    pub async fn snapshot(&self) -> TelemetrySnapshot {
        self.state.read().await.clone()
    }

    /// Applied actions for one service and direction.
    pub async fn scale_actions(&self, service: &str, action: ScaleAction) -> u64 {
        let state = self.state.read().await;
        state
            .scale_actions
            .get(&(service.to_string(), action.as_str().to_string()))
            .copied()
            .unwrap_or(0)
    }
}
