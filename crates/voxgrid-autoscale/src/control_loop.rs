//! The autoscaler control loop.
//!
//! Owns every piece of mutable scaling state: the live `ServiceSpec`s,
//! the cooldown tracker, the snapshot history and the current affinity
//! plan. Ticks take `&mut self`, so two ticks can never overlap.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use voxgrid_affinity::{AffinityPlan, assign};
use voxgrid_core::{
    AutoscaleConfig, CooldownState, MetricSnapshot, ScalingDecision, ServiceSpec, WorkerId,
    epoch_secs,
};
use voxgrid_metrics::{MetricSource, ScalerTelemetry, SourceError};
use voxgrid_pool::{PoolError, WorkerPoolController};

use crate::cooldown::CooldownTracker;
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::history::SnapshotWindow;
use crate::policy::ScalingPolicy;

/// Where the loop currently is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Sampling,
    Deciding,
    Applying,
}

/// What happened during one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub at: u64,
    /// One decision per service, in configuration order.
    pub decisions: Vec<ScalingDecision>,
    /// Decisions the pool carried out.
    pub applied: Vec<ScalingDecision>,
    /// Services that had no usable telemetry this tick.
    pub telemetry_gaps: Vec<String>,
    /// Recovered failures (telemetry and apply).
    pub failures: Vec<AutoscaleError>,
    /// New affinity plan, when membership changed.
    pub affinity: Option<AffinityPlan>,
    /// Shutdown was requested before the tick reached Applying.
    pub interrupted: bool,
}

pub struct ControlLoop<S, P> {
    config: Arc<AutoscaleConfig>,
    policy: ScalingPolicy,
    source: S,
    pool: P,
    telemetry: ScalerTelemetry,
    total_cores: usize,
    specs: Vec<ServiceSpec>,
    cooldowns: CooldownTracker,
    history: HashMap<String, SnapshotWindow>,
    plan: AffinityPlan,
    phase: LoopPhase,
}

impl<S: MetricSource, P: WorkerPoolController> ControlLoop<S, P> {
    /// Create a loop for every configured service, each assumed to run
    /// its minimum instance count until told otherwise.
    ///
    /// `total_cores` is the usable core count; 0 disables pinning.
    pub fn new(
        config: Arc<AutoscaleConfig>,
        source: S,
        pool: P,
        telemetry: ScalerTelemetry,
        total_cores: usize,
    ) -> Self {
        let specs = config
            .services
            .iter()
            .map(|b| ServiceSpec {
                name: b.name.clone(),
                min_instances: b.min_instances,
                max_instances: b.max_instances,
                current_instances: b.min_instances,
            })
            .collect();
        let history = config
            .services
            .iter()
            .map(|b| (b.name.clone(), SnapshotWindow::new(config.history_ticks)))
            .collect();

        Self {
            policy: ScalingPolicy::from_config(&config),
            config,
            source,
            pool,
            telemetry,
            total_cores,
            specs,
            cooldowns: CooldownTracker::new(),
            history,
            plan: AffinityPlan::unpinned(),
            phase: LoopPhase::Idle,
        }
    }

    /// Start from instance counts observed in the deployment (e.g. a
    /// container listing). Counts outside the bounds are repaired by the
    /// next `bootstrap` or tick.
    pub fn with_initial_counts(mut self, counts: &HashMap<String, u32>) -> Self {
        for spec in &mut self.specs {
            if let Some(count) = counts.get(&spec.name) {
                spec.current_instances = *count;
            }
        }
        self
    }

    pub fn specs(&self) -> &[ServiceSpec] {
        &self.specs
    }

    pub fn spec(&self, service: &str) -> Option<&ServiceSpec> {
        self.specs.iter().find(|s| s.name == service)
    }

    pub fn cooldown(&self, service: &str) -> CooldownState {
        self.cooldowns.state(service)
    }

    pub fn history(&self, service: &str) -> Option<&SnapshotWindow> {
        self.history.get(service)
    }

    pub fn affinity(&self) -> &AffinityPlan {
        &self.plan
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Bring every service into its bounds and pin the initial membership.
    ///
    /// Apply failures are logged and left for the first tick to retry;
    /// only an affinity failure is returned.
    pub async fn bootstrap(&mut self) -> AutoscaleResult<()> {
        self.phase = LoopPhase::Applying;
        for i in 0..self.specs.len() {
            let spec = &self.specs[i];
            let service = spec.name.clone();
            let target = spec
                .current_instances
                .clamp(spec.min_instances, spec.max_instances);

            match self.apply_count(&service, target).await {
                Ok(applied) => self.specs[i].current_instances = applied,
                Err((e, applied)) => {
                    warn!(%service, target, error = %e, "bootstrap scale failed");
                    if let Some(applied) = applied {
                        self.specs[i].current_instances = applied;
                    }
                }
            }
            self.telemetry
                .set_instances(&service, self.specs[i].current_instances)
                .await;
        }

        let result = self.rebalance().await.map(|_| ());
        self.phase = LoopPhase::Idle;
        info!(
            services = self.specs.len(),
            total_cores = self.total_cores,
            "autoscaler bootstrapped"
        );
        result
    }

    /// Run one tick at time `now` (Unix seconds).
    pub async fn tick_at(&mut self, now: u64) -> AutoscaleResult<TickReport> {
        self.tick_inner(now, None).await
    }

    /// Run one tick, ending it early at a phase boundary once `shutdown`
    /// reads true. Applying is never entered after that point.
    pub async fn tick_until(
        &mut self,
        now: u64,
        shutdown: &watch::Receiver<bool>,
    ) -> AutoscaleResult<TickReport> {
        self.tick_inner(now, Some(shutdown)).await
    }

    async fn tick_inner(
        &mut self,
        now: u64,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> AutoscaleResult<TickReport> {
        let stop_requested = || shutdown.is_some_and(|rx| *rx.borrow());
        let mut report = TickReport {
            at: now,
            ..TickReport::default()
        };

        // ── Sampling ───────────────────────────────────────────────
        self.phase = LoopPhase::Sampling;
        for (service, result) in self.sample_all().await {
            let snapshot = match result {
                Ok(Some(snapshot)) if !snapshot.is_unknown() => snapshot,
                Ok(_) => self.record_gap(&service, "no data".to_string(), now, &mut report).await,
                Err(e) => self.record_gap(&service, e.to_string(), now, &mut report).await,
            };
            if let Some(window) = self.history.get_mut(&service) {
                window.push(snapshot);
            }
        }
        if stop_requested() {
            return Ok(self.interrupted(report));
        }

        // ── Deciding ───────────────────────────────────────────────
        self.phase = LoopPhase::Deciding;
        let empty = SnapshotWindow::new(1);
        for spec in &self.specs {
            let window = self.history.get(&spec.name).unwrap_or(&empty);
            let cooldown = self.cooldowns.state(&spec.name);
            let decision = self.policy.decide(spec, window, &cooldown, now);
            if decision.is_no_op() {
                debug!(service = %decision.service, count = decision.from_count, reason = %decision.reason, "no scaling");
            } else {
                info!(
                    service = %decision.service,
                    action = decision.action.as_str(),
                    from = decision.from_count,
                    to = decision.to_count,
                    reason = %decision.reason,
                    "scaling decision"
                );
            }
            report.decisions.push(decision);
        }
        if stop_requested() {
            return Ok(self.interrupted(report));
        }

        // ── Applying ───────────────────────────────────────────────
        self.phase = LoopPhase::Applying;
        let mut membership_changed = false;
        for decision in report.decisions.iter().filter(|d| !d.is_no_op()) {
            let Some(idx) = self.specs.iter().position(|s| s.name == decision.service) else {
                continue;
            };
            let service = decision.service.as_str();

            match self.apply_count(service, decision.to_count).await {
                Ok(applied) => {
                    membership_changed |= applied != self.specs[idx].current_instances;
                    self.specs[idx].current_instances = applied;
                    self.cooldowns.record(service, decision.action, now);
                    self.telemetry.record_scale_action(service, decision.action).await;
                    info!(%service, from = decision.from_count, to = applied, "scale applied");
                    report.applied.push(decision.clone());
                }
                Err((e, applied)) => {
                    warn!(
                        %service,
                        target = decision.to_count,
                        error = %e,
                        "scale action failed, cooldown untouched"
                    );
                    if let Some(applied) = applied
                        && applied != self.specs[idx].current_instances
                    {
                        self.specs[idx].current_instances = applied;
                        membership_changed = true;
                    }
                    self.telemetry.record_apply_failure(service).await;
                    report.failures.push(AutoscaleError::ApplyFailure {
                        service: service.to_string(),
                        target: decision.to_count,
                        reason: e.to_string(),
                    });
                }
            }
        }

        for spec in &self.specs {
            self.telemetry
                .set_instances(&spec.name, spec.current_instances)
                .await;
        }

        if membership_changed {
            match self.rebalance().await {
                Ok(plan) => report.affinity = Some(plan),
                Err(e) => {
                    self.phase = LoopPhase::Idle;
                    return Err(e);
                }
            }
        }

        self.phase = LoopPhase::Idle;
        Ok(report)
    }

    /// Tick every `check_interval` until `shutdown` flips to true.
    ///
    /// A tick in progress always finishes its current phase; a tick that
    /// overruns the interval delays the next one instead of overlapping.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> AutoscaleResult<()> {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.check_interval.as_secs(),
            services = self.specs.len(),
            "autoscaler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.tick_until(epoch_secs(), &shutdown).await?;
                    debug!(
                        applied = report.applied.len(),
                        gaps = report.telemetry_gaps.len(),
                        failures = report.failures.len(),
                        "tick complete"
                    );
                    if report.interrupted || *shutdown.borrow() {
                        info!("autoscaler shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn sample_all(&self) -> Vec<(String, Result<Option<MetricSnapshot>, SourceError>)> {
        let source = &self.source;
        let timeout = self.config.sample_deadline();
        let names: Vec<String> = self.specs.iter().map(|s| s.name.clone()).collect();

        stream::iter(names)
            .map(move |service| async move {
                let result = match tokio::time::timeout(timeout, source.sample(&service)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout),
                };
                (service, result)
            })
            .buffered(self.config.sampling_concurrency.max(1))
            .collect()
            .await
    }

    async fn record_gap(
        &self,
        service: &str,
        reason: String,
        now: u64,
        report: &mut TickReport,
    ) -> MetricSnapshot {
        warn!(%service, %reason, "telemetry unavailable, holding instance count");
        self.telemetry.record_telemetry_gap(service).await;
        report.telemetry_gaps.push(service.to_string());
        report.failures.push(AutoscaleError::TelemetryUnavailable {
            service: service.to_string(),
            reason,
        });
        MetricSnapshot::unknown(service, now)
    }

    /// Ask the pool for `target` instances within the apply timeout.
    ///
    /// On failure, also returns the count the pool reached: from the
    /// error when it carries one, otherwise from the pool's own
    /// bookkeeping, which stays accurate when a timed-out call is dropped.
    async fn apply_count(&self, service: &str, target: u32) -> Result<u32, (PoolError, Option<u32>)> {
        let timeout = self.config.apply_timeout;
        let error = match tokio::time::timeout(timeout, self.pool.ensure_instance_count(service, target)).await {
            Ok(Ok(applied)) => return Ok(applied),
            Ok(Err(e)) => e,
            Err(_) => PoolError::Timeout(format!("scale {service} to {target} ({}s)", timeout.as_secs_f64())),
        };
        let applied = match error.applied() {
            Some(applied) => Some(applied),
            None => self.pool.observed_count(service).await,
        };
        Err((error, applied))
    }

    /// Recompute the affinity plan for the whole membership and push it
    /// to the pool.
    async fn rebalance(&mut self) -> AutoscaleResult<AffinityPlan> {
        let workers: Vec<WorkerId> = self.specs.iter().flat_map(|s| s.worker_ids()).collect();
        let plan = assign(self.total_cores, &workers).map_err(|e| {
            error!(error = %e, workers = workers.len(), total_cores = self.total_cores, "affinity computation failed");
            AutoscaleError::Affinity(e)
        })?;

        match tokio::time::timeout(self.config.apply_timeout, self.pool.apply_affinity(&plan)).await {
            Ok(Ok(())) => debug!(workers = workers.len(), pinned = plan.is_pinned(), "affinity applied"),
            Ok(Err(e)) => warn!(error = %e, "failed to apply affinity"),
            Err(_) => warn!("applying affinity timed out"),
        }

        self.telemetry
            .set_affinity(
                workers
                    .iter()
                    .map(|w| (w.clone(), plan.cores_for(w).map_or(0, |c| c.len()))),
            )
            .await;
        self.plan = plan.clone();
        Ok(plan)
    }

    fn interrupted(&mut self, mut report: TickReport) -> TickReport {
        info!(phase = ?self.phase, "shutdown requested, ending tick early");
        self.phase = LoopPhase::Idle;
        report.interrupted = true;
        report
    }
}
