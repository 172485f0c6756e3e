//! Daemon assembly: configuration, core detection, wiring and shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use voxgrid_affinity::{
    AffinityPlan, CGROUP_ROOT, assign, detect_cpu_limit, effective_core_count, host_parallelism,
};
use voxgrid_autoscale::ControlLoop;
use voxgrid_core::{AutoscaleConfig, WorkerId};
use voxgrid_metrics::{PrometheusSource, ScalerTelemetry};
use voxgrid_pool::{
    ContainerPoolController, ContainerTemplate, InMemoryPool, ProcessRunner, WorkerPoolController,
};

use crate::http::{AppState, build_router};

/// Options of `voxd run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub env_file: Option<PathBuf>,
    /// Decide and log, but never touch real containers.
    pub dry_run: bool,
    pub listen: SocketAddr,
}

/// Build and validate the configuration.
///
/// With `env_file`, its values are used wherever the process environment
/// does not set the key.
pub fn load_config(env_file: Option<&Path>) -> anyhow::Result<AutoscaleConfig> {
    let config = match env_file {
        Some(path) => AutoscaleConfig::from_env_file(path),
        None => AutoscaleConfig::from_env(),
    };
    config.context("invalid autoscaler configuration")
}

/// Allocator output for an explicit core count and worker list.
pub fn plan_affinity(cores: usize, workers: &[WorkerId]) -> anyhow::Result<AffinityPlan> {
    assign(cores, workers).context("affinity computation failed")
}

/// Cores the pool may use; 0 leaves placement to the host.
fn usable_cores(config: &AutoscaleConfig) -> usize {
    let detected = detect_cpu_limit(Path::new(CGROUP_ROOT));
    let host = host_parallelism();
    let cores = effective_core_count(config.cpu_core_limit, detected, host);
    info!(
        ?detected,
        host_cores = host,
        override_cores = ?config.cpu_core_limit,
        usable_cores = cores,
        "cpu limit resolved"
    );
    cores
}

/// Run the daemon until Ctrl-C or a fatal autoscaler error.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    info!(dry_run = opts.dry_run, "VoxGrid daemon starting");

    let config = Arc::new(load_config(opts.env_file.as_deref())?);
    let telemetry = ScalerTelemetry::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // ── Autoscaler ─────────────────────────────────────────────
    let scaler_handle = if !config.enabled {
        info!("ENABLE_AUTOSCALING is off; serving telemetry only");
        None
    } else {
        let total_cores = usable_cores(&config);
        let source = PrometheusSource::new(
            &config.prometheus_url,
            config.query_timeout,
            config.retry.clone(),
        )
        .with_context(|| format!("bad PROMETHEUS_URL {}", config.prometheus_url))?;

        let handle = if opts.dry_run {
            let pool = InMemoryPool::new();
            start_scaler(
                config.clone(),
                source,
                pool,
                telemetry.clone(),
                total_cores,
                HashMap::new(),
                shutdown_tx.clone(),
            )
            .await?
        } else {
            let pool = container_pool(&config)?;
            let existing = pool
                .discover()
                .await
                .context("failed to list existing containers")?;
            start_scaler(
                config.clone(),
                source,
                pool,
                telemetry.clone(),
                total_cores,
                existing,
                shutdown_tx.clone(),
            )
            .await?
        };
        Some(handle)
    };

    // ── HTTP server ────────────────────────────────────────────
    let router = build_router(AppState {
        telemetry,
        autoscaling: config.enabled,
        dry_run: opts.dry_run,
    });
    let listener = tokio::net::TcpListener::bind(opts.listen)
        .await
        .with_context(|| format!("failed to bind {}", opts.listen))?;
    info!(addr = %opts.listen, "HTTP server starting");

    let signal_tx = shutdown_tx.clone();
    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "failed to listen for Ctrl-C");
                    }
                    info!("shutdown signal received");
                    let _ = signal_tx.send(true);
                }
                _ = server_shutdown.changed() => {}
            }
        })
        .await?;

    if let Some(handle) = scaler_handle {
        handle.await.context("autoscaler task panicked")??;
    }

    info!("VoxGrid daemon stopped");
    Ok(())
}

/// Container pool with the built-in template of every configured service.
///
/// A scale stops between commands once the next one could outlive the
/// loop's apply timeout.
fn container_pool(config: &AutoscaleConfig) -> anyhow::Result<ContainerPoolController> {
    let mut pool =
        ContainerPoolController::new(ProcessRunner, config.command_timeout, config.retry.clone())
            .with_runtime(&config.container_runtime)
            .with_apply_budget(config.apply_timeout);
    for service in &config.services {
        let Some(template) = ContainerTemplate::builtin(&service.name) else {
            bail!("no container template for service {}", service.name);
        };
        pool = pool.with_template(&service.name, template);
    }
    Ok(pool)
}

/// Bootstrap the control loop and spawn it.
///
/// A fatal loop error flips the shared shutdown signal so the HTTP server
/// stops too, and is returned from the task.
async fn start_scaler<P>(
    config: Arc<AutoscaleConfig>,
    source: PrometheusSource,
    pool: P,
    telemetry: ScalerTelemetry,
    total_cores: usize,
    existing: HashMap<String, u32>,
    shutdown_tx: Arc<watch::Sender<bool>>,
) -> anyhow::Result<JoinHandle<anyhow::Result<()>>>
where
    P: WorkerPoolController + 'static,
{
    let mut scaler = ControlLoop::new(config, source, pool, telemetry, total_cores)
        .with_initial_counts(&existing);
    scaler.bootstrap().await.context("autoscaler bootstrap failed")?;

    let shutdown_rx = shutdown_tx.subscribe();

    Ok(tokio::spawn(async move {
        let result = scaler.run(shutdown_rx).await;
        if let Err(e) = &result {
            error!(error = %e, "autoscaler stopped");
            let _ = shutdown_tx.send(true);
        }
        result.map_err(anyhow::Error::from)
    }))
}
