//! Container-runtime worker pool.
//!
//! Each instance is one named container started from a per-service
//! template. Instance `n` of service `s` is the container
//! `<s>-service-<n>`; instances are numbered from 1, scale-up starts the
//! next index and scale-down removes the highest one. The known count
//! moves with every completed command, so a scale that is cut short
//! resumes where it stopped.
//!
//! ```text
//!   ensure_instance_count("asr", 3)      (currently 1)
//!        │
//!        ├─ docker run -d --name asr-service-2 ... asr-translator/asr-service
//!        └─ docker run -d --name asr-service-3 ...
//!
//!   apply_affinity(plan)
//!        └─ docker update --cpuset-cpus 0-1 asr-service-1   (per worker)
//! ```

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use voxgrid_affinity::AffinityPlan;
use voxgrid_core::{RetryConfig, retry_budget, retry_with_backoff_when};

use crate::controller::WorkerPoolController;
use crate::error::{PoolError, PoolResult};

/// Runs an external program and returns its stdout.
///
/// A non-zero exit is an `Err` carrying stderr.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
    ) -> impl Future<Output = Result<String, String>> + Send;
}

/// Spawns real processes via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, String> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to execute '{program}': {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(format!("exit code {exit_code}: {}", stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// How to start one instance of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTemplate {
    pub image: String,
    /// Instance `n` exports its metrics on `metrics_port_base + n`.
    pub metrics_port_base: u16,
    /// Inserted before the image name (volumes, extra env).
    pub extra_args: Vec<String>,
}

impl ContainerTemplate {
    pub fn new(image: impl Into<String>, metrics_port_base: u16) -> Self {
        Self {
            image: image.into(),
            metrics_port_base,
            extra_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Templates for the pipeline's own services.
    pub fn builtin(service: &str) -> Option<Self> {
        match service {
            "asr" => Some(
                Self::new("asr-translator/asr-service", 8010).with_args([
                    "-v",
                    "./vosk-model-small-en-us-0.15:/vosk-model-small-en-us-0.15",
                ]),
            ),
            "translator" | "translation" => {
                Some(Self::new("asr-translator/translator-service", 8020))
            }
            _ => None,
        }
    }
}

/// Name of the container backing instance `n` of `service`.
pub fn container_name(service: &str, n: u32) -> String {
    format!("{service}-service-{n}")
}

/// Instance index of `name` if it is a container of `service`.
fn instance_index(service: &str, name: &str) -> Option<u32> {
    name.strip_prefix(service)?
        .strip_prefix("-service-")?
        .parse()
        .ok()
}

/// `ps` states that still hold a worker.
fn is_live(state: &str) -> bool {
    matches!(state, "running" | "restarting" | "paused")
}

fn name_in_use(reason: &str) -> bool {
    reason.contains("already in use")
}

fn no_such_container(reason: &str) -> bool {
    reason.to_ascii_lowercase().contains("no such container")
}

/// Runtime answers that another attempt cannot change.
fn is_permanent(e: &PoolError) -> bool {
    matches!(e, PoolError::Command { reason, .. } if name_in_use(reason) || no_such_container(reason))
}

/// Drives a container CLI (`docker` by default).
pub struct ContainerPoolController<R = ProcessRunner> {
    runner: R,
    runtime: String,
    templates: HashMap<String, ContainerTemplate>,
    /// Instances known to run per service, updated after every completed
    /// start or stop. Holding the lock serializes every mutation of the
    /// pool.
    counts: Mutex<HashMap<String, u32>>,
    /// Per attempt of one CLI command.
    command_timeout: Duration,
    /// Time one `ensure_instance_count` may spend; unbounded when `None`.
    apply_budget: Option<Duration>,
    retry: RetryConfig,
}

impl<R: CommandRunner> ContainerPoolController<R> {
    pub fn new(runner: R, command_timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            runner,
            runtime: "docker".to_string(),
            templates: HashMap::new(),
            counts: Mutex::new(HashMap::new()),
            command_timeout,
            apply_budget: None,
            retry,
        }
    }

    /// Use another docker-compatible CLI (e.g. `podman`).
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn with_template(mut self, service: &str, template: ContainerTemplate) -> Self {
        self.templates.insert(service.to_string(), template);
        self
    }

    /// Stop a scale before a step that could run past `budget` and
    /// report the count reached so far.
    pub fn with_apply_budget(mut self, budget: Duration) -> Self {
        self.apply_budget = Some(budget);
        self
    }

    /// Adopt the running containers of every templated service.
    ///
    /// Exited or created containers are removed so their names are free.
    /// The adopted count is the unbroken run of instances from 1; live
    /// instances past a gap are adopted when a scale-up reaches them.
    pub async fn discover(&self) -> PoolResult<HashMap<String, u32>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--format".to_string(),
            "{{.Names}} {{.State}}".to_string(),
        ];
        let listing = self.exec(&args).await?;

        let mut live: HashMap<&str, BTreeSet<u32>> =
            self.templates.keys().map(|s| (s.as_str(), BTreeSet::new())).collect();
        let mut stale = Vec::new();
        for line in listing.lines() {
            let mut fields = line.split_whitespace();
            let Some(name) = fields.next() else { continue };
            let state = fields.next().unwrap_or_default();
            for (service, indexes) in live.iter_mut() {
                if let Some(n) = instance_index(service, name) {
                    if is_live(state) {
                        indexes.insert(n);
                    } else {
                        stale.push(name.to_string());
                    }
                }
            }
        }

        for name in &stale {
            match self.exec(&["rm".to_string(), "-f".to_string(), name.clone()]).await {
                Ok(_) => info!(container = %name, "removed stale container"),
                Err(e) => warn!(container = %name, error = %e, "failed to remove stale container"),
            }
        }

        let mut found = HashMap::with_capacity(live.len());
        for (service, indexes) in &live {
            let count = (1..).take_while(|n| indexes.contains(n)).count() as u32;
            let detached: Vec<u32> = indexes.iter().copied().filter(|n| *n > count).collect();
            if !detached.is_empty() {
                warn!(%service, count, instances = ?detached, "instances running past a gap");
            }
            found.insert(service.to_string(), count);
        }

        info!(services = ?found, stale = stale.len(), "discovered existing containers");
        *self.counts.lock().await = found.clone();
        Ok(found)
    }

    /// Instances this controller believes are running.
    pub async fn known_count(&self, service: &str) -> u32 {
        self.counts.lock().await.get(service).copied().unwrap_or(0)
    }

    async fn exec(&self, args: &[String]) -> PoolResult<String> {
        let command = format!("{} {}", self.runtime, args.join(" "));
        let runner = &self.runner;
        let runtime = self.runtime.as_str();
        let timeout = self.command_timeout;
        let display = command.as_str();

        retry_with_backoff_when(&self.retry, display, |e| !is_permanent(e), move || async move {
            match tokio::time::timeout(timeout, runner.run(runtime, args)).await {
                Ok(Ok(stdout)) => Ok(stdout),
                Ok(Err(reason)) => Err(PoolError::Command {
                    command: display.to_string(),
                    reason,
                }),
                Err(_) => Err(PoolError::Timeout(display.to_string())),
            }
        })
        .await
    }

    fn run_args(service: &str, template: &ContainerTemplate, n: u32) -> Vec<String> {
        let port = u32::from(template.metrics_port_base) + n;
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            container_name(service, n),
            "--network".into(),
            "host".into(),
            "-e".into(),
            format!("METRICS_PORT={port}"),
            "-e".into(),
            "CPU_AFFINITY_ENABLED=True".into(),
        ];
        args.extend(template.extra_args.iter().cloned());
        args.push(template.image.clone());
        args
    }

    async fn start(&self, service: &str, template: &ContainerTemplate, n: u32) -> PoolResult<()> {
        let name = container_name(service, n);
        let args = Self::run_args(service, template, n);

        match self.exec(&args).await {
            Ok(_) => {}
            Err(PoolError::Command { reason, .. }) if name_in_use(&reason) => {
                let inspect = vec![
                    "inspect".to_string(),
                    "--format".to_string(),
                    "{{.State.Running}}".to_string(),
                    name.clone(),
                ];
                if self.exec(&inspect).await?.trim() == "true" {
                    info!(%service, container = %name, "adopted running instance");
                    return Ok(());
                }
                self.exec(&["rm".to_string(), "-f".to_string(), name.clone()]).await?;
                self.exec(&args).await?;
                info!(%service, container = %name, "replaced stale container");
            }
            Err(e) => return Err(e),
        }
        info!(
            %service,
            container = %name,
            metrics_port = u32::from(template.metrics_port_base) + n,
            "started instance"
        );
        Ok(())
    }

    async fn stop(&self, service: &str, n: u32) -> PoolResult<()> {
        let name = container_name(service, n);
        for verb in ["stop", "rm"] {
            match self.exec(&[verb.to_string(), name.clone()]).await {
                Ok(_) => {}
                Err(PoolError::Command { reason, .. }) if no_such_container(&reason) => {
                    debug!(%service, container = %name, "already gone");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        info!(%service, container = %name, "removed instance");
        Ok(())
    }
}

impl<R: CommandRunner> WorkerPoolController for ContainerPoolController<R> {
    async fn ensure_instance_count(&self, service: &str, target: u32) -> PoolResult<u32> {
        let template = self
            .templates
            .get(service)
            .ok_or_else(|| PoolError::UnknownService(service.to_string()))?;

        let mut counts = self.counts.lock().await;
        let current = counts.get(service).copied().unwrap_or(0);
        if current == target {
            debug!(%service, target, "already at target, no scaling needed");
            return Ok(target);
        }

        let started = Instant::now();
        let command_deadline = retry_budget(&self.retry, self.command_timeout);
        let mut applied = current;
        let mut failure = None;
        while applied != target {
            // The first step always runs; later ones only if they fit.
            let step_commands = if applied < target { 1 } else { 2 };
            if let Some(budget) = self.apply_budget
                && applied != current
                && started.elapsed() + command_deadline * step_commands > budget
            {
                failure = Some(PoolError::Timeout(format!(
                    "scale {service} to {target} within {:.1}s",
                    budget.as_secs_f64()
                )));
                break;
            }

            let step = if applied < target {
                self.start(service, template, applied + 1).await.map(|()| applied + 1)
            } else {
                self.stop(service, applied).await.map(|()| applied - 1)
            };
            match step {
                Ok(reached) => {
                    applied = reached;
                    counts.insert(service.to_string(), applied);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        match failure {
            None => Ok(applied),
            Some(e) => {
                warn!(%service, target, applied, error = %e, "scale stopped early");
                Err(PoolError::Incomplete {
                    service: service.to_string(),
                    target,
                    applied,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn observed_count(&self, service: &str) -> Option<u32> {
        Some(self.known_count(service).await)
    }

    async fn apply_affinity(&self, plan: &AffinityPlan) -> PoolResult<()> {
        if !plan.is_pinned() {
            debug!("no core limit, leaving placement to the host scheduler");
            return Ok(());
        }

        let counts = self.counts.lock().await.clone();
        let mut services: Vec<(&String, &u32)> = counts.iter().collect();
        services.sort();

        let mut first_error = None;
        for (service, running) in services {
            for (n, assignment) in plan.for_service(service) {
                if n > *running {
                    continue;
                }
                let args = vec![
                    "update".to_string(),
                    "--cpuset-cpus".to_string(),
                    assignment.cpuset(),
                    container_name(service, n),
                ];
                if let Err(e) = self.exec(&args).await {
                    warn!(worker = %assignment.worker_id, error = %e, "failed to pin worker");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Container runtime double: tracks containers by name and answers
    /// like the docker CLI. A configured delay runs before the command
    /// takes effect, so a dropped call changes nothing.
    #[derive(Clone, Default)]
    struct FakeRuntime {
        calls: Arc<StdMutex<Vec<String>>>,
        /// name → running
        containers: Arc<StdMutex<BTreeMap<String, bool>>>,
        fail_on: Arc<StdMutex<Option<String>>>,
        delay: Arc<StdMutex<Duration>>,
    }

    impl FakeRuntime {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_matching(&self, needle: &str) -> usize {
            self.calls().iter().filter(|c| c.contains(needle)).count()
        }

        fn fail_on(&self, needle: &str) {
            *self.fail_on.lock().unwrap() = Some(needle.to_string());
        }

        fn seed(&self, name: &str, running: bool) {
            self.containers.lock().unwrap().insert(name.to_string(), running);
        }

        fn containers(&self) -> BTreeMap<String, bool> {
            self.containers.lock().unwrap().clone()
        }

        fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = delay;
        }
    }

    impl CommandRunner for FakeRuntime {
        async fn run(&self, program: &str, args: &[String]) -> Result<String, String> {
            let line = format!("{program} {}", args.join(" "));
            self.calls.lock().unwrap().push(line.clone());
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let failing = self
                .fail_on
                .lock()
                .unwrap()
                .as_deref()
                .is_some_and(|needle| line.contains(needle));
            if failing {
                return Err("boom".to_string());
            }

            let mut containers = self.containers.lock().unwrap();
            let target = args.last().cloned().unwrap_or_default();
            let missing = || format!("Error: No such container: {target}");
            match args.first().map(String::as_str) {
                Some("run") => {
                    let at = args.iter().position(|a| a == "--name").unwrap();
                    let name = args[at + 1].clone();
                    if containers.contains_key(&name) {
                        return Err(format!(
                            "Conflict. The container name \"/{name}\" is already in use"
                        ));
                    }
                    containers.insert(name, true);
                    Ok(String::new())
                }
                Some("ps") => Ok(containers
                    .iter()
                    .map(|(name, running)| {
                        format!("{name} {}\n", if *running { "running" } else { "exited" })
                    })
                    .collect()),
                Some("inspect") => containers.get(&target).map(|r| format!("{r}\n")).ok_or_else(missing),
                Some("stop") => match containers.get_mut(&target) {
                    Some(running) => {
                        *running = false;
                        Ok(target.clone())
                    }
                    None => Err(missing()),
                },
                Some("rm") => containers.remove(&target).map(|_| target.clone()).ok_or_else(missing),
                _ => Ok(String::new()),
            }
        }
    }

    fn retry(attempts: u32) -> RetryConfig {
        RetryConfig {
            attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        }
    }

    fn controller(runtime: FakeRuntime) -> ContainerPoolController<FakeRuntime> {
        ContainerPoolController::new(runtime, Duration::from_secs(1), retry(1))
            .with_template("asr", ContainerTemplate::builtin("asr").unwrap())
            .with_template("translator", ContainerTemplate::builtin("translator").unwrap())
    }

    #[test]
    fn parses_instance_index() {
        assert_eq!(instance_index("asr", "asr-service-3"), Some(3));
        assert_eq!(instance_index("asr", "translator-service-1"), None);
        assert_eq!(instance_index("asr", "asr-service-x"), None);
        assert_eq!(instance_index("asr", "asr-v2-service-1"), None);
    }

    #[tokio::test]
    async fn scale_up_starts_numbered_containers() {
        let runtime = FakeRuntime::default();
        let pool = controller(runtime.clone());

        assert_eq!(pool.ensure_instance_count("asr", 2).await, Ok(2));

        let calls = runtime.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("docker run -d --name asr-service-1 --network host"));
        assert!(calls[0].contains("METRICS_PORT=8011"));
        assert!(calls[0].contains("CPU_AFFINITY_ENABLED=True"));
        assert!(calls[0].ends_with("asr-translator/asr-service"));
        assert!(calls[1].contains("--name asr-service-2"));
    }

    #[tokio::test]
    async fn scale_down_removes_highest_index_first() {
        let runtime = FakeRuntime::default();
        let pool = controller(runtime.clone());
        pool.ensure_instance_count("translator", 3).await.unwrap();

        assert_eq!(pool.ensure_instance_count("translator", 1).await, Ok(1));

        let calls = runtime.calls()[3..].to_vec();
        assert_eq!(
            calls,
            vec![
                "docker stop translator-service-3",
                "docker rm translator-service-3",
                "docker stop translator-service-2",
                "docker rm translator-service-2",
            ]
        );
        assert_eq!(runtime.containers().len(), 1);
    }

    #[tokio::test]
    async fn same_target_is_a_no_op() {
        let runtime = FakeRuntime::default();
        let pool = controller(runtime.clone());
        pool.ensure_instance_count("asr", 1).await.unwrap();
        pool.ensure_instance_count("asr", 1).await.unwrap();
        assert_eq!(runtime.calls().len(), 1);
    }

    #[tokio::test]
    async fn partial_scale_reports_applied_count() {
        let runtime = FakeRuntime::default();
        let pool = controller(runtime.clone());
        runtime.fail_on("asr-service-3");

        let err = pool.ensure_instance_count("asr", 4).await.unwrap_err();
        assert_eq!(err.applied(), Some(2));
        assert_eq!(pool.known_count("asr").await, 2);
        assert_eq!(pool.observed_count("asr").await, Some(2));
    }

    #[tokio::test]
    async fn unknown_service_is_rejected() {
        let pool = controller(FakeRuntime::default());
        assert_eq!(
            pool.ensure_instance_count("ocr", 1).await,
            Err(PoolError::UnknownService("ocr".to_string()))
        );
    }

    #[tokio::test]
    async fn discover_adopts_running_and_removes_stale() {
        let runtime = FakeRuntime::default();
        runtime.seed("asr-service-1", true);
        runtime.seed("asr-service-2", false);
        runtime.seed("redis", true);
        runtime.seed("translator-service-1", true);
        let pool = controller(runtime.clone());

        let found = pool.discover().await.unwrap();
        assert_eq!(found["asr"], 1);
        assert_eq!(found["translator"], 1);
        assert!(!runtime.containers().contains_key("asr-service-2"));
        assert!(runtime.containers().contains_key("redis"));

        assert_eq!(pool.ensure_instance_count("asr", 2).await, Ok(2));
        assert_eq!(runtime.containers().get("asr-service-2"), Some(&true));
    }

    #[tokio::test]
    async fn instance_past_a_gap_is_adopted_on_scale_up() {
        let runtime = FakeRuntime::default();
        runtime.seed("asr-service-1", true);
        runtime.seed("asr-service-3", true);
        let pool = controller(runtime.clone());

        assert_eq!(pool.discover().await.unwrap()["asr"], 1);
        assert_eq!(pool.ensure_instance_count("asr", 3).await, Ok(3));

        assert_eq!(runtime.containers().values().filter(|r| **r).count(), 3);
        assert_eq!(runtime.calls_matching("--name asr-service-3"), 1);
        assert_eq!(runtime.calls_matching("inspect"), 1);
    }

    #[tokio::test]
    async fn stopped_container_with_same_name_is_replaced() {
        let runtime = FakeRuntime::default();
        runtime.seed("asr-service-1", false);
        let pool = ContainerPoolController::new(runtime.clone(), Duration::from_secs(1), retry(3))
            .with_template("asr", ContainerTemplate::builtin("asr").unwrap());

        assert_eq!(pool.ensure_instance_count("asr", 1).await, Ok(1));

        assert_eq!(runtime.containers().get("asr-service-1"), Some(&true));
        assert!(runtime.calls().contains(&"docker rm -f asr-service-1".to_string()));
        // A name conflict is not retried as if it were transient.
        assert_eq!(runtime.calls_matching("--name asr-service-1"), 2);
    }

    #[tokio::test]
    async fn removing_a_vanished_instance_still_scales_down() {
        let runtime = FakeRuntime::default();
        let pool = controller(runtime.clone());
        pool.ensure_instance_count("asr", 2).await.unwrap();
        runtime.containers.lock().unwrap().remove("asr-service-2");

        assert_eq!(pool.ensure_instance_count("asr", 1).await, Ok(1));
        assert_eq!(pool.known_count("asr").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_scale_keeps_completed_instances() {
        let runtime = FakeRuntime::default();
        runtime.set_delay(Duration::from_secs(12));
        let pool = ContainerPoolController::new(runtime.clone(), Duration::from_secs(20), retry(1))
            .with_template("asr", ContainerTemplate::builtin("asr").unwrap());

        // The caller gives up while the second `run` is in flight.
        let result =
            tokio::time::timeout(Duration::from_secs(20), pool.ensure_instance_count("asr", 2)).await;
        assert!(result.is_err());
        assert_eq!(pool.known_count("asr").await, 1);
        assert_eq!(runtime.containers().len(), 1);

        assert_eq!(pool.ensure_instance_count("asr", 2).await, Ok(2));
        assert_eq!(runtime.calls_matching("--name asr-service-1"), 1);
        assert_eq!(runtime.calls_matching("--name asr-service-2"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn apply_budget_ends_scale_between_commands() {
        let runtime = FakeRuntime::default();
        runtime.set_delay(Duration::from_secs(12));
        let pool = ContainerPoolController::new(runtime.clone(), Duration::from_secs(13), retry(1))
            .with_template("asr", ContainerTemplate::builtin("asr").unwrap())
            .with_apply_budget(Duration::from_secs(20));

        let started = tokio::time::Instant::now();
        let err = pool.ensure_instance_count("asr", 2).await.unwrap_err();
        assert_eq!(err.applied(), Some(1));
        assert_eq!(started.elapsed(), Duration::from_secs(12));
        assert_eq!(pool.known_count("asr").await, 1);

        assert_eq!(pool.ensure_instance_count("asr", 2).await, Ok(2));
        assert_eq!(runtime.containers().len(), 2);
    }

    #[tokio::test]
    async fn affinity_updates_running_containers_only() {
        let runtime = FakeRuntime::default();
        let pool = controller(runtime.clone());
        pool.ensure_instance_count("asr", 1).await.unwrap();

        let workers = vec!["asr-1".to_string(), "asr-2".to_string()];
        let plan = voxgrid_affinity::assign(4, &workers).unwrap();
        pool.apply_affinity(&plan).await.unwrap();

        let calls = runtime.calls();
        assert_eq!(calls.last().unwrap(), "docker update --cpuset-cpus 0-1 asr-service-1");
        assert_eq!(runtime.calls_matching("update"), 1);
    }

    #[tokio::test]
    async fn unpinned_plan_runs_nothing() {
        let runtime = FakeRuntime::default();
        let pool = controller(runtime.clone());
        pool.apply_affinity(&AffinityPlan::unpinned()).await.unwrap();
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn alternative_runtime_is_invoked() {
        let runtime = FakeRuntime::default();
        let pool = controller(runtime.clone()).with_runtime("podman");
        pool.ensure_instance_count("translator", 1).await.unwrap();
        assert!(runtime.calls()[0].starts_with("podman run -d --name translator-service-1"));
    }
}
