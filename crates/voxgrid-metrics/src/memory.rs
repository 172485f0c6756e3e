//! In-memory metric source.
//!
//! Holds the latest snapshot per service and lets callers inject
//! failures or delays. Cloning shares the underlying state, so a test can
//! keep one handle while the control loop owns another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use voxgrid_core::MetricSnapshot;

use crate::source::{MetricSource, SourceError, SourceResult};

#[derive(Debug, Clone)]
enum Entry {
    Snapshot(MetricSnapshot),
    Failing(SourceError),
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    delays: HashMap<String, Duration>,
    queries: u64,
}

/// Metric source backed by a shared in-memory map.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    inner: Arc<RwLock<Inner>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot returned for `snapshot.service`.
    pub async fn set(&self, snapshot: MetricSnapshot) {
        let mut inner = self.inner.write().await;
        inner
            .entries
            .insert(snapshot.service.clone(), Entry::Snapshot(snapshot));
    }

    /// Set all three signals for a service at once.
    pub async fn set_signals(
        &self,
        service: &str,
        queue_depth: u64,
        cpu_percent: f64,
        p95_processing_time_secs: f64,
        observed_at: u64,
    ) {
        self.set(MetricSnapshot {
            service: service.to_string(),
            queue_depth: Some(queue_depth),
            cpu_percent: Some(cpu_percent),
            p95_processing_time_secs: Some(p95_processing_time_secs),
            observed_at,
        })
        .await;
    }

    /// Make every query for `service` fail with `error`.
    pub async fn fail(&self, service: &str, error: SourceError) {
        let mut inner = self.inner.write().await;
        inner
            .entries
            .insert(service.to_string(), Entry::Failing(error));
    }

    /// Forget `service`; queries return `Ok(None)`.
    pub async fn clear(&self, service: &str) {
        let mut inner = self.inner.write().await;
        inner.entries.remove(service);
    }

    /// Delay every answer for `service` by `delay`.
    pub async fn set_delay(&self, service: &str, delay: Duration) {
        let mut inner = self.inner.write().await;
        inner.delays.insert(service.to_string(), delay);
    }

    /// Total number of `sample` calls served.
    pub async fn query_count(&self) -> u64 {
        self.inner.read().await.queries
    }
}

impl MetricSource for InMemorySource {
    async fn sample(&self, service: &str) -> SourceResult<Option<MetricSnapshot>> {
        let (entry, delay) = {
            let mut inner = self.inner.write().await;
            inner.queries += 1;
            (
                inner.entries.get(service).cloned(),
                inner.delays.get(service).copied(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        debug!(%service, found = entry.is_some(), "in-memory metrics sampled");
        match entry {
            Some(Entry::Snapshot(snapshot)) => Ok(Some(snapshot)),
            Some(Entry::Failing(error)) => Err(error),
            None => Ok(None),
        }
    }
}
