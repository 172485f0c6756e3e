//! In-memory worker pool.
//!
//! Tracks instance counts and pinned core sets without starting
//! anything. Failures and slow responses can be injected per service.
//! Clones share state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use voxgrid_affinity::AffinityPlan;

use crate::controller::WorkerPoolController;
use crate::error::{PoolError, PoolResult};

#[derive(Debug, Default)]
struct Inner {
    counts: HashMap<String, u32>,
    /// worker → cpuset string; absent when unpinned.
    pinned: BTreeMap<String, String>,
    failures: HashMap<String, PoolError>,
    delays: HashMap<String, Duration>,
    /// Every `ensure_instance_count` call, in order.
    calls: Vec<(String, u32)>,
    affinity_updates: u64,
}

/// Bookkeeping-only worker pool.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPool {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `service` already runs `count` instances.
    pub async fn set_count(&self, service: &str, count: u32) {
        self.inner.lock().await.counts.insert(service.to_string(), count);
    }

    pub async fn count(&self, service: &str) -> u32 {
        self.inner
            .lock()
            .await
            .counts
            .get(service)
            .copied()
            .unwrap_or(0)
    }

    /// Fail every request for `service` with `error` until `recover`.
    pub async fn fail(&self, service: &str, error: PoolError) {
        self.inner
            .lock()
            .await
            .failures
            .insert(service.to_string(), error);
    }

    pub async fn recover(&self, service: &str) {
        self.inner.lock().await.failures.remove(service);
    }

    /// Delay every request for `service`.
    pub async fn set_delay(&self, service: &str, delay: Duration) {
        self.inner
            .lock()
            .await
            .delays
            .insert(service.to_string(), delay);
    }

    /// Every `(service, target)` requested so far.
    pub async fn calls(&self) -> Vec<(String, u32)> {
        self.inner.lock().await.calls.clone()
    }

    /// Current worker → cpuset pinning.
    pub async fn pinned(&self) -> BTreeMap<String, String> {
        self.inner.lock().await.pinned.clone()
    }

    pub async fn affinity_updates(&self) -> u64 {
        self.inner.lock().await.affinity_updates
    }
}

impl WorkerPoolController for InMemoryPool {
    async fn ensure_instance_count(&self, service: &str, target: u32) -> PoolResult<u32> {
        let delay = {
            let mut inner = self.inner.lock().await;
            inner.calls.push((service.to_string(), target));
            inner.delays.get(service).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        if let Some(error) = inner.failures.get(service) {
            return Err(error.clone());
        }

        let current = inner.counts.entry(service.to_string()).or_insert(0);
        if *current == target {
            debug!(%service, target, "already at target, no scaling needed");
        } else {
            info!(%service, from = *current, to = target, "instance count set");
            *current = target;
        }
        Ok(target)
    }

    async fn observed_count(&self, service: &str) -> Option<u32> {
        Some(self.count(service).await)
    }

    async fn apply_affinity(&self, plan: &AffinityPlan) -> PoolResult<()> {
        let mut inner = self.inner.lock().await;
        inner.affinity_updates += 1;
        inner.pinned = plan
            .assignments
            .iter()
            .map(|a| (a.worker_id.clone(), a.cpuset()))
            .collect();
        Ok(())
    }
}
