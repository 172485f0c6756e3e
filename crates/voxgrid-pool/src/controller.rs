//! The contract between the control loop and the deployment layer.

use std::future::Future;
use std::sync::Arc;

use voxgrid_affinity::AffinityPlan;

use crate::error::PoolResult;

/// Sets instance counts and core pinning for named services.
///
/// `ensure_instance_count` must be idempotent: asking for the count a
/// service already runs is a successful no-op. On success it returns the
/// count now running. A call dropped part-way must leave the pool's own
/// bookkeeping matching what it actually started or stopped.
pub trait WorkerPoolController: Send + Sync {
    fn ensure_instance_count(
        &self,
        service: &str,
        target: u32,
    ) -> impl Future<Output = PoolResult<u32>> + Send;

    /// Instances the pool believes `service` runs, if it tracks them.
    fn observed_count(&self, service: &str) -> impl Future<Output = Option<u32>> + Send {
        let _ = service;
        async { None }
    }

    /// Pin workers to the cores in `plan`. Pools that cannot pin ignore it.
    fn apply_affinity(&self, plan: &AffinityPlan) -> impl Future<Output = PoolResult<()>> + Send {
        let _ = plan;
        async { Ok(()) }
    }
}

impl<P: WorkerPoolController> WorkerPoolController for Arc<P> {
    fn ensure_instance_count(
        &self,
        service: &str,
        target: u32,
    ) -> impl Future<Output = PoolResult<u32>> + Send {
        (**self).ensure_instance_count(service, target)
    }

    fn observed_count(&self, service: &str) -> impl Future<Output = Option<u32>> + Send {
        (**self).observed_count(service)
    }

    fn apply_affinity(&self, plan: &AffinityPlan) -> impl Future<Output = PoolResult<()>> + Send {
        (**self).apply_affinity(plan)
    }
}
