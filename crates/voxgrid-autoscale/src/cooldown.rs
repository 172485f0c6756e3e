//! Per-service, per-direction cooldown bookkeeping.
//!
//! Only the control loop writes here, and only after the pool confirmed
//! an action. The policy reads copies of the state.

use std::collections::HashMap;

use voxgrid_core::{CooldownState, ScaleAction};

/// Seconds left before another action is allowed, or `None` if allowed.
///
/// `last` is the time of the last applied action in that direction.
pub fn cooldown_remaining(last: Option<u64>, window_secs: u64, now: u64) -> Option<u64> {
    let last = last?;
    let elapsed = now.saturating_sub(last);
    (elapsed < window_secs).then(|| window_secs - elapsed)
}

#[derive(Debug, Clone, Default)]
pub struct CooldownTracker {
    states: HashMap<String, CooldownState>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `service` (empty if it never scaled).
    pub fn state(&self, service: &str) -> CooldownState {
        self.states
            .get(service)
            .cloned()
            .unwrap_or_else(|| CooldownState::new(service))
    }

    /// Record an applied action. `NoOp` is ignored.
    pub fn record(&mut self, service: &str, action: ScaleAction, at: u64) {
        let state = self
            .states
            .entry(service.to_string())
            .or_insert_with(|| CooldownState::new(service));
        match action {
            ScaleAction::ScaleUp => state.last_scale_up_at = Some(at),
            ScaleAction::ScaleDown => state.last_scale_down_at = Some(at),
            ScaleAction::NoOp => {}
        }
    }
}
