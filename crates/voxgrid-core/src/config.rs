//! Autoscaler configuration.
//!
//! Built once at startup from environment-style key/value pairs and then
//! shared read-only. Every key is optional; see `AutoscaleConfig::default`
//! for the fallbacks. Values that do not parse, and combinations that do
//! not make sense (`QUEUE_LOW_THRESHOLD >= QUEUE_HIGH_THRESHOLD`, min above
//! max, ...), are rejected with a `ConfigError` rather than clamped.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::retry::retry_budget;

/// Min/max instance bounds of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBounds {
    pub name: String,
    pub min_instances: u32,
    pub max_instances: u32,
}

/// Load thresholds shared by every service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub queue_high: u64,
    pub queue_low: u64,
    pub cpu_high: f64,
    pub cpu_low: f64,
    /// p95 processing time (seconds) at which a service scales up.
    pub processing_time_high: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            queue_high: 10,
            queue_low: 2,
            cpu_high: 70.0,
            cpu_low: 20.0,
            processing_time_high: 30.0,
        }
    }
}

/// Minimum spacing between two applied actions in the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownConfig {
    pub scale_up_secs: u64,
    pub scale_down_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            scale_up_secs: 60,
            scale_down_secs: 180,
        }
    }
}

/// Retry policy applied at every external call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Immutable autoscaler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscaleConfig {
    pub enabled: bool,
    pub check_interval: Duration,
    /// Services in evaluation order.
    pub services: Vec<ServiceBounds>,
    pub thresholds: ThresholdConfig,
    pub cooldowns: CooldownConfig,
    /// Instances added or removed by one load-driven action.
    pub scale_step: u32,
    /// Consecutive low-load snapshots required before scaling down.
    pub scale_down_sustain_ticks: usize,
    /// Snapshots kept per service.
    pub history_ticks: usize,
    /// Per attempt of one metrics query.
    pub query_timeout: Duration,
    /// Whole `ensure_instance_count` call.
    pub apply_timeout: Duration,
    /// Per attempt of one container CLI command.
    pub command_timeout: Duration,
    pub retry: RetryConfig,
    /// Services sampled concurrently within one tick.
    pub sampling_concurrency: usize,
    /// Usable core count override; `None` means detect.
    pub cpu_core_limit: Option<usize>,
    pub prometheus_url: String,
    /// Docker-compatible CLI driving the containers.
    pub container_runtime: String,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: Duration::from_secs(30),
            services: ["asr", "translator"]
                .into_iter()
                .map(|name| ServiceBounds {
                    name: name.to_string(),
                    min_instances: 1,
                    max_instances: 5,
                })
                .collect(),
            thresholds: ThresholdConfig::default(),
            cooldowns: CooldownConfig::default(),
            scale_step: 1,
            scale_down_sustain_ticks: 1,
            history_ticks: 5,
            query_timeout: Duration::from_secs(5),
            apply_timeout: Duration::from_secs(20),
            command_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
            sampling_concurrency: 4,
            cpu_core_limit: None,
            prometheus_url: "http://localhost:9090".to_string(),
            container_runtime: "docker".to_string(),
        }
    }
}

impl AutoscaleConfig {
    /// Build from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build from an env file overlaid with the process environment.
    ///
    /// Keys set in the real environment win over the file.
    pub fn from_env_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::EnvFile {
            path: path.display().to_string(),
            source,
        })?;
        let mut vars: HashMap<String, String> = parse_env_file(&content).into_iter().collect();
        vars.extend(std::env::vars());
        Self::from_vars(vars)
    }

    /// Build from arbitrary key/value pairs and validate the result.
    pub fn from_vars<I, K, V>(vars: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = Vars(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        let defaults = Self::default();

        let service_names: Vec<String> = match vars.get("AUTOSCALE_SERVICES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.services.iter().map(|s| s.name.clone()).collect(),
        };

        let global_min: u32 = vars.parse_or("MIN_INSTANCES", 1)?;
        let mut services = Vec::with_capacity(service_names.len());
        for name in service_names {
            let key = env_key(&name);
            services.push(ServiceBounds {
                min_instances: vars.parse_or(&format!("MIN_{key}_INSTANCES"), global_min)?,
                max_instances: vars.parse_or(&format!("MAX_{key}_INSTANCES"), 5)?,
                name,
            });
        }

        let retry = RetryConfig {
            attempts: vars.parse_or("RETRY_ATTEMPTS", defaults.retry.attempts)?,
            base_backoff: Duration::from_millis(vars.parse_or(
                "RETRY_BACKOFF_MS",
                defaults.retry.base_backoff.as_millis() as u64,
            )?),
            max_backoff: defaults.retry.max_backoff,
        };

        let config = Self {
            enabled: vars.bool_or("ENABLE_AUTOSCALING", defaults.enabled)?,
            check_interval: Duration::from_secs(
                vars.parse_or("AUTOSCALE_CHECK_INTERVAL", defaults.check_interval.as_secs())?,
            ),
            services,
            thresholds: ThresholdConfig {
                queue_high: vars.parse_or("QUEUE_HIGH_THRESHOLD", defaults.thresholds.queue_high)?,
                queue_low: vars.parse_or("QUEUE_LOW_THRESHOLD", defaults.thresholds.queue_low)?,
                cpu_high: vars.parse_or("CPU_HIGH_THRESHOLD", defaults.thresholds.cpu_high)?,
                cpu_low: vars.parse_or("CPU_LOW_THRESHOLD", defaults.thresholds.cpu_low)?,
                processing_time_high: vars.parse_or(
                    "PROCESSING_TIME_THRESHOLD",
                    defaults.thresholds.processing_time_high,
                )?,
            },
            cooldowns: CooldownConfig {
                scale_up_secs: vars.parse_or("SCALE_UP_COOLDOWN", defaults.cooldowns.scale_up_secs)?,
                scale_down_secs: vars
                    .parse_or("SCALE_DOWN_COOLDOWN", defaults.cooldowns.scale_down_secs)?,
            },
            scale_step: vars.parse_or("SCALE_STEP", defaults.scale_step)?,
            scale_down_sustain_ticks: vars
                .parse_or("SCALE_DOWN_SUSTAIN_TICKS", defaults.scale_down_sustain_ticks)?,
            history_ticks: vars.parse_or("METRICS_HISTORY_TICKS", defaults.history_ticks)?,
            query_timeout: Duration::from_secs(
                vars.parse_or("METRICS_QUERY_TIMEOUT", defaults.query_timeout.as_secs())?,
            ),
            apply_timeout: Duration::from_secs(
                vars.parse_or("SCALE_APPLY_TIMEOUT", defaults.apply_timeout.as_secs())?,
            ),
            command_timeout: Duration::from_secs(
                vars.parse_or("CONTAINER_COMMAND_TIMEOUT", defaults.command_timeout.as_secs())?,
            ),
            retry,
            sampling_concurrency: vars
                .parse_or("SAMPLING_CONCURRENCY", defaults.sampling_concurrency)?,
            cpu_core_limit: vars.parse_opt("CPU_CORE_LIMIT")?,
            prometheus_url: vars
                .get("PROMETHEUS_URL")
                .map(str::to_string)
                .unwrap_or(defaults.prometheus_url),
            container_runtime: vars
                .get("CONTAINER_RUNTIME")
                .map(str::to_string)
                .unwrap_or(defaults.container_runtime),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check every cross-field constraint.
    pub fn validate(&self) -> ConfigResult<()> {
        let t = &self.thresholds;
        if t.queue_low >= t.queue_high {
            return Err(ConfigError::ThresholdOrder {
                low_key: "QUEUE_LOW_THRESHOLD",
                high_key: "QUEUE_HIGH_THRESHOLD",
                low: t.queue_low.to_string(),
                high: t.queue_high.to_string(),
            });
        }
        for (key, value) in [
            ("CPU_LOW_THRESHOLD", t.cpu_low),
            ("CPU_HIGH_THRESHOLD", t.cpu_high),
            ("PROCESSING_TIME_THRESHOLD", t.processing_time_high),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                    reason: "must be a finite, non-negative number".to_string(),
                });
            }
        }
        if t.cpu_low >= t.cpu_high {
            return Err(ConfigError::ThresholdOrder {
                low_key: "CPU_LOW_THRESHOLD",
                high_key: "CPU_HIGH_THRESHOLD",
                low: t.cpu_low.to_string(),
                high: t.cpu_high.to_string(),
            });
        }
        if t.processing_time_high <= 0.0 {
            return Err(ConfigError::Constraint(
                "PROCESSING_TIME_THRESHOLD must be greater than zero".to_string(),
            ));
        }

        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        let mut seen = HashSet::new();
        for s in &self.services {
            if !seen.insert(s.name.as_str()) {
                return Err(ConfigError::DuplicateService(s.name.clone()));
            }
            if s.min_instances < 1 {
                return Err(ConfigError::MinInstancesZero {
                    service: s.name.clone(),
                });
            }
            if s.min_instances > s.max_instances {
                return Err(ConfigError::BoundsInverted {
                    service: s.name.clone(),
                    min: s.min_instances,
                    max: s.max_instances,
                });
            }
        }

        if self.check_interval.is_zero() {
            return Err(ConfigError::Constraint(
                "AUTOSCALE_CHECK_INTERVAL must be greater than zero".to_string(),
            ));
        }
        for (key, timeout) in [
            ("METRICS_QUERY_TIMEOUT", self.query_timeout),
            ("SCALE_APPLY_TIMEOUT", self.apply_timeout),
        ] {
            if timeout.is_zero() || timeout >= self.check_interval {
                return Err(ConfigError::TimeoutTooLong {
                    key,
                    timeout_secs: timeout.as_secs_f64(),
                    interval_secs: self.check_interval.as_secs(),
                });
            }
        }
        if self.command_timeout.is_zero() {
            return Err(ConfigError::Constraint(
                "CONTAINER_COMMAND_TIMEOUT must be greater than zero".to_string(),
            ));
        }
        for (key, budget, limit_key, limit) in [
            (
                "METRICS_QUERY_TIMEOUT",
                self.sample_deadline(),
                "AUTOSCALE_CHECK_INTERVAL",
                self.check_interval,
            ),
            (
                "CONTAINER_COMMAND_TIMEOUT",
                self.command_deadline(),
                "SCALE_APPLY_TIMEOUT",
                self.apply_timeout,
            ),
        ] {
            if budget >= limit {
                return Err(ConfigError::RetryBudgetTooLong {
                    key,
                    budget_secs: budget.as_secs_f64(),
                    limit_key,
                    limit_secs: limit.as_secs_f64(),
                });
            }
        }

        if self.cooldowns.scale_down_secs < self.cooldowns.scale_up_secs {
            return Err(ConfigError::Constraint(format!(
                "SCALE_DOWN_COOLDOWN ({}s) must not be shorter than SCALE_UP_COOLDOWN ({}s)",
                self.cooldowns.scale_down_secs, self.cooldowns.scale_up_secs
            )));
        }
        if self.scale_step < 1 {
            return Err(ConfigError::Constraint("SCALE_STEP must be at least 1".to_string()));
        }
        if self.history_ticks < 1 {
            return Err(ConfigError::Constraint(
                "METRICS_HISTORY_TICKS must be at least 1".to_string(),
            ));
        }
        if self.scale_down_sustain_ticks < 1 || self.scale_down_sustain_ticks > self.history_ticks {
            return Err(ConfigError::Constraint(format!(
                "SCALE_DOWN_SUSTAIN_TICKS must be between 1 and METRICS_HISTORY_TICKS ({})",
                self.history_ticks
            )));
        }
        if self.sampling_concurrency < 1 {
            return Err(ConfigError::Constraint(
                "SAMPLING_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest one service sample may take, retries included.
    pub fn sample_deadline(&self) -> Duration {
        retry_budget(&self.retry, self.query_timeout)
    }

    /// Longest one container command may take, retries included.
    pub fn command_deadline(&self) -> Duration {
        retry_budget(&self.retry, self.command_timeout)
    }

    /// Bounds for a configured service.
    pub fn service(&self, name: &str) -> Option<&ServiceBounds> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Parse `KEY=VALUE` lines; blank lines and `#` comments are skipped,
/// an optional `export ` prefix and surrounding quotes are stripped.
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// `asr-worker` → `ASR_WORKER`.
fn env_key(service: &str) -> String {
    service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

struct Vars(HashMap<String, String>);

impl Vars {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn parse_opt<T>(&self, key: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn parse_or<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn bool_or(&self, key: &str, default: bool) -> ConfigResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: "expected a boolean".to_string(),
                }),
            },
        }
    }
}
