//! Control loop against in-memory metric sources and worker pools.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::watch;

use voxgrid_autoscale::{AutoscaleError, ControlLoop, LoopPhase};
use voxgrid_core::{AutoscaleConfig, ScaleAction, ScaleReason, ServiceBounds};
use voxgrid_metrics::{InMemorySource, ScalerTelemetry, SourceError};
use voxgrid_pool::{
    CommandRunner, ContainerPoolController, ContainerTemplate, InMemoryPool, PoolError,
    WorkerPoolController,
};

const T0: u64 = 1_700_000_000;

type TestLoop = ControlLoop<InMemorySource, InMemoryPool>;

struct Harness {
    scaler: TestLoop,
    source: InMemorySource,
    pool: InMemoryPool,
    telemetry: ScalerTelemetry,
}

fn bounds(name: &str, min: u32, max: u32) -> ServiceBounds {
    ServiceBounds {
        name: name.to_string(),
        min_instances: min,
        max_instances: max,
    }
}

fn config() -> AutoscaleConfig {
    AutoscaleConfig {
        enabled: true,
        services: vec![bounds("asr", 1, 3), bounds("translator", 1, 3)],
        ..AutoscaleConfig::default()
    }
}

fn harness(config: AutoscaleConfig, total_cores: usize) -> Harness {
    let source = InMemorySource::new();
    let pool = InMemoryPool::new();
    let telemetry = ScalerTelemetry::new();
    let scaler = ControlLoop::new(
        Arc::new(config),
        source.clone(),
        pool.clone(),
        telemetry.clone(),
        total_cores,
    );
    Harness {
        scaler,
        source,
        pool,
        telemetry,
    }
}

fn decision_for<'a>(
    report: &'a voxgrid_autoscale::TickReport,
    service: &str,
) -> &'a voxgrid_core::ScalingDecision {
    report
        .decisions
        .iter()
        .find(|d| d.service == service)
        .unwrap()
}

#[tokio::test]
async fn scale_up_cooldown_then_scale_down() {
    let mut h = harness(config(), 0);
    h.scaler.bootstrap().await.unwrap();
    assert_eq!(h.pool.count("asr").await, 1);

    h.source.set_signals("asr", 15, 10.0, 1.0, T0).await;
    h.source.set_signals("translator", 5, 40.0, 1.0, T0).await;
    let report = h.scaler.tick_at(T0).await.unwrap();
    let asr = decision_for(&report, "asr");
    assert_eq!(asr.action, ScaleAction::ScaleUp);
    assert_eq!((asr.from_count, asr.to_count), (1, 2));
    assert_eq!(decision_for(&report, "translator").reason, ScaleReason::Steady);
    assert_eq!(h.pool.count("asr").await, 2);

    // Still loaded, but inside the 60 s scale-up cooldown.
    h.source.set_signals("asr", 16, 10.0, 1.0, T0 + 30).await;
    let report = h.scaler.tick_at(T0 + 30).await.unwrap();
    assert_eq!(
        decision_for(&report, "asr").reason,
        ScaleReason::ScaleUpCooldown { remaining_secs: 30 }
    );
    assert_eq!(h.pool.count("asr").await, 2);

    h.source.set_signals("asr", 1, 5.0, 1.0, T0 + 90).await;
    let report = h.scaler.tick_at(T0 + 90).await.unwrap();
    let asr = decision_for(&report, "asr");
    assert_eq!(asr.action, ScaleAction::ScaleDown);
    assert_eq!((asr.from_count, asr.to_count), (2, 1));
    assert_eq!(h.pool.count("asr").await, 1);

    assert_eq!(h.telemetry.scale_actions("asr", ScaleAction::ScaleUp).await, 1);
    assert_eq!(h.telemetry.scale_actions("asr", ScaleAction::ScaleDown).await, 1);
    assert_eq!(h.telemetry.snapshot().await.instances["asr"], 1);
    assert_eq!(h.scaler.phase(), LoopPhase::Idle);
}

#[tokio::test]
async fn telemetry_failure_is_isolated_to_its_service() {
    let mut h = harness(config(), 0);
    h.scaler.bootstrap().await.unwrap();

    h.source.set_signals("asr", 50, 90.0, 1.0, T0).await;
    h.source
        .fail("translator", SourceError::Unreachable("connection refused".into()))
        .await;

    let report = h.scaler.tick_at(T0).await.unwrap();

    assert_eq!(decision_for(&report, "asr").action, ScaleAction::ScaleUp);
    assert_eq!(
        decision_for(&report, "translator").reason,
        ScaleReason::TelemetryUnknown
    );
    assert_eq!(report.telemetry_gaps, vec!["translator".to_string()]);
    assert!(matches!(
        &report.failures[..],
        [AutoscaleError::TelemetryUnavailable { service, .. }] if service == "translator"
    ));
    assert_eq!(h.pool.count("asr").await, 2);
    assert_eq!(h.pool.count("translator").await, 1);
    assert_eq!(h.telemetry.snapshot().await.telemetry_gaps["translator"], 1);
}

#[tokio::test]
async fn missing_data_counts_as_a_gap() {
    let mut h = harness(config(), 0);
    h.scaler.bootstrap().await.unwrap();

    let report = h.scaler.tick_at(T0).await.unwrap();
    assert_eq!(report.telemetry_gaps.len(), 2);
    assert!(report.decisions.iter().all(|d| d.is_no_op()));
    assert_eq!(h.scaler.history("asr").unwrap().len(), 1);
}

#[tokio::test]
async fn failed_apply_leaves_cooldown_for_retry() {
    let mut h = harness(config(), 0);
    h.scaler.bootstrap().await.unwrap();

    h.source.set_signals("asr", 50, 90.0, 1.0, T0).await;
    h.pool
        .fail(
            "asr",
            PoolError::Rejected {
                service: "asr".into(),
                reason: "no capacity".into(),
            },
        )
        .await;

    let report = h.scaler.tick_at(T0).await.unwrap();
    assert!(report.applied.is_empty());
    assert!(matches!(
        &report.failures[..],
        [AutoscaleError::ApplyFailure { service, target: 2, .. }] if service == "asr"
    ));
    assert_eq!(h.scaler.cooldown("asr").last_scale_up_at, None);
    assert_eq!(h.scaler.spec("asr").unwrap().current_instances, 1);
    assert_eq!(h.telemetry.snapshot().await.apply_failures["asr"], 1);

    // The very next tick retries; no cooldown is in the way.
    h.pool.recover("asr").await;
    let report = h.scaler.tick_at(T0 + 1).await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(h.pool.count("asr").await, 2);
    assert_eq!(h.scaler.cooldown("asr").last_scale_up_at, Some(T0 + 1));
}

#[tokio::test]
async fn partial_apply_records_reached_count() {
    let mut cfg = config();
    cfg.scale_step = 2;
    let mut h = harness(cfg, 4);
    h.scaler.bootstrap().await.unwrap();

    h.source.set_signals("asr", 50, 90.0, 1.0, T0).await;
    h.pool
        .fail(
            "asr",
            PoolError::Incomplete {
                service: "asr".into(),
                target: 3,
                applied: 2,
                reason: "image pull failed".into(),
            },
        )
        .await;

    let report = h.scaler.tick_at(T0).await.unwrap();
    assert_eq!(decision_for(&report, "asr").to_count, 3);
    assert_eq!(h.scaler.spec("asr").unwrap().current_instances, 2);
    assert_eq!(h.scaler.cooldown("asr").last_scale_up_at, None);
    // Membership changed, so workers were repinned.
    let plan = report.affinity.unwrap();
    assert_eq!(plan.assignments.len(), 3);
}

#[tokio::test]
async fn bounds_are_repaired_without_telemetry() {
    let mut h = harness(config(), 0);
    let observed = HashMap::from([("asr".to_string(), 0), ("translator".to_string(), 7)]);
    h.scaler = h.scaler.with_initial_counts(&observed);

    let report = h.scaler.tick_at(T0).await.unwrap();

    let asr = decision_for(&report, "asr");
    assert_eq!((asr.action, asr.to_count), (ScaleAction::ScaleUp, 1));
    assert_eq!(asr.reason, ScaleReason::BelowMinimum);
    let translator = decision_for(&report, "translator");
    assert_eq!((translator.action, translator.to_count), (ScaleAction::ScaleDown, 3));
    assert_eq!(translator.reason, ScaleReason::AboveMaximum);

    assert!(h.scaler.specs().iter().all(|s| s.within_bounds()));
    assert_eq!(h.pool.count("translator").await, 3);
}

#[tokio::test]
async fn bootstrap_repairs_observed_counts() {
    let mut h = harness(config(), 0);
    let observed = HashMap::from([("asr".to_string(), 2), ("translator".to_string(), 9)]);
    h.scaler = h.scaler.with_initial_counts(&observed);

    h.scaler.bootstrap().await.unwrap();

    assert_eq!(h.pool.count("asr").await, 2);
    assert_eq!(h.pool.count("translator").await, 3);
    assert_eq!(h.scaler.cooldown("translator").last_scale_down_at, None);
}

#[tokio::test]
async fn applied_actions_never_flap_or_leave_bounds() {
    let mut cfg = config();
    cfg.services = vec![bounds("asr", 1, 10), bounds("translator", 2, 4)];
    let mut h = harness(cfg, 8);
    h.scaler.bootstrap().await.unwrap();

    let mut ups = Vec::new();
    let mut downs = Vec::new();
    for step in 0..60u64 {
        let now = T0 + step * 10;
        // Alternate between overload and idle every 100 s.
        let (queue, cpu) = if (step / 10) % 2 == 0 { (40, 95.0) } else { (0, 1.0) };
        h.source.set_signals("asr", queue, cpu, 1.0, now).await;
        h.source.set_signals("translator", queue, cpu, 1.0, now).await;

        let report = h.scaler.tick_at(now).await.unwrap();
        for d in report.applied.iter().filter(|d| d.service == "asr") {
            match d.action {
                ScaleAction::ScaleUp => ups.push(now),
                ScaleAction::ScaleDown => downs.push(now),
                ScaleAction::NoOp => unreachable!(),
            }
        }
        assert!(h.scaler.specs().iter().all(|s| s.within_bounds()));
    }

    assert!(ups.len() >= 2 && downs.len() >= 1);
    assert!(ups.windows(2).all(|w| w[1] - w[0] >= 60));
    assert!(downs.windows(2).all(|w| w[1] - w[0] >= 180));
}

#[tokio::test]
async fn membership_changes_repin_every_worker() {
    let mut h = harness(config(), 4);
    h.scaler.bootstrap().await.unwrap();

    let pinned = h.pool.pinned().await;
    assert_eq!(pinned["asr-1"], "0-1");
    assert_eq!(pinned["translator-1"], "2-3");

    h.source.set_signals("asr", 15, 10.0, 1.0, T0).await;
    h.source.set_signals("translator", 5, 40.0, 1.0, T0).await;
    let report = h.scaler.tick_at(T0).await.unwrap();
    assert!(report.affinity.is_some());

    let pinned = h.pool.pinned().await;
    assert_eq!(pinned["asr-1"], "0-1");
    assert_eq!(pinned["asr-2"], "2");
    assert_eq!(pinned["translator-1"], "3");

    let gauges = h.telemetry.snapshot().await.affinity_cores;
    assert_eq!(gauges["asr-1"], 2);
    assert_eq!(gauges["asr-2"], 1);
    assert_eq!(gauges["translator-1"], 1);

    // A steady tick does not touch the pinning.
    let updates = h.pool.affinity_updates().await;
    let report = h.scaler.tick_at(T0 + 10).await.unwrap();
    assert!(report.affinity.is_none());
    assert_eq!(h.pool.affinity_updates().await, updates);
}

#[tokio::test]
async fn no_core_limit_means_no_pinning() {
    let mut h = harness(config(), 0);
    h.scaler.bootstrap().await.unwrap();

    assert!(h.pool.pinned().await.is_empty());
    assert!(!h.scaler.affinity().is_pinned());
    let gauges = h.telemetry.snapshot().await.affinity_cores;
    assert_eq!(gauges["asr-1"], 0);
    assert_eq!(gauges["translator-1"], 0);
}

#[tokio::test(start_paused = true)]
async fn slow_source_times_out() {
    let mut cfg = config();
    cfg.query_timeout = Duration::from_secs(5);
    let mut h = harness(cfg.clone(), 0);
    h.scaler.bootstrap().await.unwrap();

    // Slower than every retry of the query put together.
    assert!(cfg.sample_deadline() < Duration::from_secs(30));
    h.source.set_signals("asr", 50, 90.0, 1.0, T0).await;
    h.source.set_delay("asr", Duration::from_secs(30)).await;
    h.source.set_signals("translator", 50, 90.0, 1.0, T0).await;

    let report = h.scaler.tick_at(T0).await.unwrap();
    assert_eq!(report.telemetry_gaps, vec!["asr".to_string()]);
    assert_eq!(decision_for(&report, "translator").action, ScaleAction::ScaleUp);
    assert!(decision_for(&report, "asr").is_no_op());
}

#[tokio::test(start_paused = true)]
async fn slow_pool_times_out() {
    let mut cfg = config();
    cfg.apply_timeout = Duration::from_secs(20);
    let mut h = harness(cfg, 0);
    h.scaler.bootstrap().await.unwrap();

    h.pool.set_delay("asr", Duration::from_secs(30)).await;
    h.source.set_signals("asr", 50, 90.0, 1.0, T0).await;

    let report = h.scaler.tick_at(T0).await.unwrap();
    assert!(report.applied.is_empty());
    assert!(matches!(
        &report.failures[..],
        [AutoscaleError::ApplyFailure { service, .. }] if service == "asr"
    ));
    assert_eq!(h.scaler.cooldown("asr").last_scale_up_at, None);
}

#[tokio::test(start_paused = true)]
async fn run_ticks_until_shutdown() {
    let h = harness(config(), 0);
    let Harness {
        mut scaler,
        source,
        pool,
        ..
    } = h;
    scaler.bootstrap().await.unwrap();
    source.set_signals("asr", 50, 90.0, 1.0, T0).await;

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        scaler.run(rx).await?;
        Ok::<_, AutoscaleError>(scaler)
    });

    tokio::time::sleep(Duration::from_secs(65)).await;
    tx.send(true).unwrap();
    let scaler = handle.await.unwrap().unwrap();

    assert!(source.query_count().await >= 4);
    // Every tick ran within the same wall-clock minute: one scale-up.
    assert_eq!(pool.count("asr").await, 2);
    assert_eq!(scaler.phase(), LoopPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_first_tick_applies_nothing() {
    let Harness {
        mut scaler,
        source,
        pool,
        ..
    } = harness(config(), 0);
    scaler.bootstrap().await.unwrap();
    source.set_signals("asr", 50, 90.0, 1.0, T0).await;

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    scaler.run(rx).await.unwrap();

    assert_eq!(pool.count("asr").await, 1);
    assert_eq!(pool.calls().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_sampling_skips_applying() {
    let mut h = harness(config(), 0);
    h.scaler.bootstrap().await.unwrap();
    let calls_before = h.pool.calls().await.len();

    h.source.set_signals("asr", 50, 90.0, 1.0, T0).await;
    h.source.set_delay("asr", Duration::from_secs(3)).await;

    let (tx, rx) = watch::channel(false);
    let (report, ()) = tokio::join!(h.scaler.tick_until(T0, &rx), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
    });
    let report = report.unwrap();

    assert!(report.interrupted);
    assert!(report.decisions.is_empty());
    assert!(report.applied.is_empty());
    assert_eq!(h.pool.calls().await.len(), calls_before);
    assert_eq!(h.pool.count("asr").await, 1);
    assert_eq!(h.scaler.phase(), LoopPhase::Idle);
    // The sample already in flight still finished and was kept.
    assert_eq!(h.scaler.history("asr").unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_stops_at_the_next_phase_boundary() {
    let Harness {
        mut scaler,
        source,
        pool,
        ..
    } = harness(config(), 0);
    scaler.bootstrap().await.unwrap();
    let calls_before = pool.calls().await.len();
    source.set_signals("asr", 50, 90.0, 1.0, T0).await;
    source.set_delay("asr", Duration::from_secs(3)).await;

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        scaler.run(rx).await?;
        Ok::<_, AutoscaleError>(scaler)
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    tx.send(true).unwrap();
    let scaler = handle.await.unwrap().unwrap();

    assert_eq!(source.query_count().await, 2);
    assert_eq!(pool.calls().await.len(), calls_before);
    assert_eq!(scaler.phase(), LoopPhase::Idle);
}

/// Container CLI stand-in: every command takes `delay` before it takes
/// effect, and `run` rejects a name that is already taken.
#[derive(Clone, Default)]
struct SlowRuntime {
    delay: Duration,
    containers: Arc<StdMutex<BTreeSet<String>>>,
    /// Names passed to `run`, including calls that never finished.
    runs: Arc<StdMutex<Vec<String>>>,
}

impl CommandRunner for SlowRuntime {
    async fn run(&self, _program: &str, args: &[String]) -> Result<String, String> {
        let name = args
            .iter()
            .position(|a| a == "--name")
            .map(|at| args[at + 1].clone());
        if let Some(name) = &name {
            self.runs.lock().unwrap().push(name.clone());
        }
        tokio::time::sleep(self.delay).await;

        let Some(name) = name else {
            return Ok(String::new());
        };
        if !self.containers.lock().unwrap().insert(name.clone()) {
            return Err(format!("Conflict. The container name \"/{name}\" is already in use"));
        }
        Ok(String::new())
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_container_apply_resumes_where_it_stopped() {
    let mut cfg = config();
    cfg.services = vec![bounds("asr", 2, 3)];
    cfg.apply_timeout = Duration::from_secs(20);
    cfg.command_timeout = Duration::from_secs(13);
    cfg.retry.attempts = 1;

    let runtime = SlowRuntime {
        delay: Duration::from_secs(12),
        ..SlowRuntime::default()
    };
    let pool = Arc::new(
        ContainerPoolController::new(runtime.clone(), cfg.command_timeout, cfg.retry.clone())
            .with_template("asr", ContainerTemplate::builtin("asr").unwrap()),
    );
    let mut scaler = ControlLoop::new(
        Arc::new(cfg),
        InMemorySource::new(),
        pool.clone(),
        ScalerTelemetry::new(),
        0,
    )
    .with_initial_counts(&HashMap::from([("asr".to_string(), 0)]));

    // The second `run` is still in flight when the apply timeout fires.
    scaler.bootstrap().await.unwrap();
    assert_eq!(pool.known_count("asr").await, 1);
    assert_eq!(scaler.spec("asr").unwrap().current_instances, 1);

    let report = scaler.tick_at(T0).await.unwrap();
    assert_eq!(decision_for(&report, "asr").reason, ScaleReason::BelowMinimum);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(scaler.spec("asr").unwrap().current_instances, 2);
    assert_eq!(pool.known_count("asr").await, 2);
    assert_eq!(
        *runtime.runs.lock().unwrap(),
        vec!["asr-service-1", "asr-service-2", "asr-service-2"]
    );
    assert_eq!(runtime.containers.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn pool_handle_is_shared() {
    let h = harness(config(), 0);
    h.scaler.pool().ensure_instance_count("asr", 2).await.unwrap();
    assert_eq!(h.pool.count("asr").await, 2);
}
