//! Container CPU limit detection.
//!
//! Only a CPU *quota* counts as a limit here. A process without a quota
//! reports `CpuLimit::Unlimited`, which the allocator turns into a
//! host-managed (unpinned) plan.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default cgroup mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Usable cores reported by the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuLimit {
    /// No quota configured, or the quota could not be read.
    Unlimited,
    /// Whole cores allowed by the quota (at least 1).
    Cores(usize),
}

/// Read the CPU quota under `cgroup_root`.
///
/// Tries cgroup v2 `cpu.max` first, then the cgroup v1 CFS files.
pub fn detect_cpu_limit(cgroup_root: &Path) -> CpuLimit {
    if let Ok(content) = fs::read_to_string(cgroup_root.join("cpu.max"))
        && let Some(limit) = parse_cpu_max(&content)
    {
        debug!(?limit, "cpu limit from cgroup v2");
        return limit;
    }

    for dir in ["cpu", "cpu,cpuacct"] {
        let base = cgroup_root.join(dir);
        let quota = fs::read_to_string(base.join("cpu.cfs_quota_us"));
        let period = fs::read_to_string(base.join("cpu.cfs_period_us"));
        if let (Ok(quota), Ok(period)) = (quota, period)
            && let Some(limit) = parse_cfs_quota(&quota, &period)
        {
            debug!(?limit, "cpu limit from cgroup v1");
            return limit;
        }
    }

    CpuLimit::Unlimited
}

/// Parse cgroup v2 `cpu.max` ("<quota|max> <period>").
pub fn parse_cpu_max(content: &str) -> Option<CpuLimit> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period: u64 = parts.next().map_or(Some(100_000), |p| p.parse().ok())?;
    if quota == "max" {
        return Some(CpuLimit::Unlimited);
    }
    cores_from_quota(quota.parse().ok()?, period)
}

/// Parse cgroup v1 `cpu.cfs_quota_us` / `cpu.cfs_period_us`.
pub fn parse_cfs_quota(quota: &str, period: &str) -> Option<CpuLimit> {
    let quota: i64 = quota.trim().parse().ok()?;
    let period: u64 = period.trim().parse().ok()?;
    if quota < 0 {
        return Some(CpuLimit::Unlimited);
    }
    cores_from_quota(quota as u64, period)
}

fn cores_from_quota(quota: u64, period: u64) -> Option<CpuLimit> {
    if period == 0 {
        return None;
    }
    Some(CpuLimit::Cores(((quota / period) as usize).max(1)))
}

/// Cores handed to the allocator.
///
/// An explicit override wins; otherwise the detected quota, capped by
/// the host's parallelism. `Unlimited` maps to 0 (no pinning).
pub fn effective_core_count(override_cores: Option<usize>, detected: CpuLimit, host_cores: usize) -> usize {
    match (override_cores, detected) {
        (Some(cores), _) => cores,
        (None, CpuLimit::Unlimited) => 0,
        (None, CpuLimit::Cores(cores)) if host_cores > 0 => cores.min(host_cores),
        (None, CpuLimit::Cores(cores)) => cores,
    }
}

/// Logical CPUs visible to this process, 0 if unknown.
pub fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(0)
}
