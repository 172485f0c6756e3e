//! Threshold scaling policy.
//!
//! `ScalingPolicy::decide` is a pure function of its arguments: it reads
//! no clock, holds no lock and keeps no state between calls.

use serde::{Deserialize, Serialize};

use voxgrid_core::{
    AutoscaleConfig, CooldownConfig, CooldownState, MetricSnapshot, ScaleAction, ScaleReason,
    ScalingDecision, ServiceSpec, ThresholdConfig,
};

use crate::cooldown::cooldown_remaining;
use crate::history::SnapshotWindow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub thresholds: ThresholdConfig,
    pub cooldowns: CooldownConfig,
    /// Instances added or removed by one load-driven action.
    pub step: u32,
    /// Consecutive low-load snapshots needed before scaling down.
    pub sustain_ticks: usize,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            cooldowns: CooldownConfig::default(),
            step: 1,
            sustain_ticks: 1,
        }
    }
}

impl ScalingPolicy {
    pub fn from_config(config: &AutoscaleConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            cooldowns: config.cooldowns,
            step: config.scale_step,
            sustain_ticks: config.scale_down_sustain_ticks,
        }
    }

    /// Decide what to do with `spec` at time `now`.
    pub fn decide(
        &self,
        spec: &ServiceSpec,
        window: &SnapshotWindow,
        cooldown: &CooldownState,
        now: u64,
    ) -> ScalingDecision {
        let current = spec.current_instances;

        // Bounds repair first; cooldowns do not apply.
        if current < spec.min_instances {
            return self.action(spec, ScaleAction::ScaleUp, spec.min_instances, ScaleReason::BelowMinimum, now);
        }
        if current > spec.max_instances {
            return self.action(spec, ScaleAction::ScaleDown, spec.max_instances, ScaleReason::AboveMaximum, now);
        }

        let latest = match window.latest() {
            Some(s) if !s.is_unknown() => s,
            _ => return ScalingDecision::no_op(&spec.name, current, ScaleReason::TelemetryUnknown, now),
        };

        if let Some(reason) = self.scale_up_trigger(latest) {
            if current >= spec.max_instances {
                return ScalingDecision::no_op(&spec.name, current, ScaleReason::AtMaximum, now);
            }
            if let Some(remaining_secs) =
                cooldown_remaining(cooldown.last_scale_up_at, self.cooldowns.scale_up_secs, now)
            {
                return ScalingDecision::no_op(
                    &spec.name,
                    current,
                    ScaleReason::ScaleUpCooldown { remaining_secs },
                    now,
                );
            }
            let target = current.saturating_add(self.step.max(1)).min(spec.max_instances);
            return self.action(spec, ScaleAction::ScaleUp, target, reason, now);
        }

        if self.sustained_low_load(window) {
            if current <= spec.min_instances {
                return ScalingDecision::no_op(&spec.name, current, ScaleReason::AtMinimum, now);
            }
            if let Some(remaining_secs) =
                cooldown_remaining(cooldown.last_scale_down_at, self.cooldowns.scale_down_secs, now)
            {
                return ScalingDecision::no_op(
                    &spec.name,
                    current,
                    ScaleReason::ScaleDownCooldown { remaining_secs },
                    now,
                );
            }
            let target = current.saturating_sub(self.step.max(1)).max(spec.min_instances);
            return self.action(spec, ScaleAction::ScaleDown, target, ScaleReason::LoadLow, now);
        }

        ScalingDecision::no_op(&spec.name, current, ScaleReason::Steady, now)
    }

    /// First signal at or above its high threshold, if any.
    fn scale_up_trigger(&self, snapshot: &MetricSnapshot) -> Option<ScaleReason> {
        let t = &self.thresholds;
        if let Some(depth) = snapshot.queue_depth().filter(|d| *d >= t.queue_high) {
            return Some(ScaleReason::QueueHigh { depth });
        }
        if let Some(percent) = snapshot.cpu_percent().filter(|c| *c >= t.cpu_high) {
            return Some(ScaleReason::CpuHigh { percent });
        }
        snapshot
            .p95_processing_time_secs()
            .filter(|p| *p >= t.processing_time_high)
            .map(|seconds| ScaleReason::ProcessingTimeHigh { seconds })
    }

    /// Queue and CPU known and low, and latency not high.
    fn low_load(&self, snapshot: &MetricSnapshot) -> bool {
        let t = &self.thresholds;
        let queue_low = snapshot.queue_depth().is_some_and(|d| d <= t.queue_low);
        let cpu_low = snapshot.cpu_percent().is_some_and(|c| c <= t.cpu_low);
        let latency_high = snapshot
            .p95_processing_time_secs()
            .is_some_and(|p| p >= t.processing_time_high);
        queue_low && cpu_low && !latency_high
    }

    fn sustained_low_load(&self, window: &SnapshotWindow) -> bool {
        let needed = self.sustain_ticks.max(1);
        window.len() >= needed && window.recent(needed).all(|s| self.low_load(s))
    }

    fn action(
        &self,
        spec: &ServiceSpec,
        action: ScaleAction,
        to_count: u32,
        reason: ScaleReason,
        now: u64,
    ) -> ScalingDecision {
        ScalingDecision {
            service: spec.name.clone(),
            action,
            from_count: spec.current_instances,
            to_count,
            reason,
            decided_at: now,
        }
    }
}
