//! Core partitioning across an ordered worker membership.
//!
//! The plan is always recomputed from scratch for the full membership;
//! nothing is patched incrementally.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use voxgrid_core::{AffinityAssignment, CoreIndex, WorkerId};

use crate::error::{AffinityError, AffinityResult};

/// Core assignment for every worker of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AffinityPlan {
    /// Usable cores the plan was computed for; 0 means host-managed.
    pub total_cores: usize,
    /// One entry per worker, in membership order. Empty when unpinned.
    pub assignments: Vec<AffinityAssignment>,
}

impl AffinityPlan {
    /// Plan that leaves placement to the host scheduler.
    pub fn unpinned() -> Self {
        Self::default()
    }

    /// Whether any worker carries an explicit core set.
    pub fn is_pinned(&self) -> bool {
        !self.assignments.is_empty()
    }

    /// Cores assigned to `worker`, if it is pinned.
    pub fn cores_for(&self, worker: &str) -> Option<&BTreeSet<CoreIndex>> {
        self.assignments
            .iter()
            .find(|a| a.worker_id == worker)
            .map(|a| &a.core_set)
    }

    /// Assignments of the workers `<service>-<n>`, with their instance `n`.
    pub fn for_service<'a>(
        &'a self,
        service: &'a str,
    ) -> impl Iterator<Item = (u32, &'a AffinityAssignment)> + 'a {
        self.assignments.iter().filter_map(move |a| {
            let (owner, n) = a.worker_id.rsplit_once('-')?;
            let n = n.parse().ok()?;
            (owner == service).then_some((n, a))
        })
    }

    /// Check the coverage invariants of a pinned plan.
    ///
    /// Every worker has at least one core, every core index is below
    /// `total_cores`, every core in `[0, min(total_cores, used))` is
    /// assigned, and cores are only shared when workers outnumber them.
    pub fn validate(&self) -> AffinityResult<()> {
        if !self.is_pinned() {
            return Ok(());
        }

        let mut covered = BTreeSet::new();
        let mut claimed = 0usize;
        for a in &self.assignments {
            if a.core_set.is_empty() {
                return Err(AffinityError::EmptyCoreSet(a.worker_id.clone()));
            }
            for &core in &a.core_set {
                if core >= self.total_cores {
                    return Err(AffinityError::CoreOutOfRange {
                        core,
                        total_cores: self.total_cores,
                    });
                }
                covered.insert(core);
                claimed += 1;
            }
        }

        let workers = self.assignments.len();
        let expected = self.total_cores.min(claimed);
        let missing: Vec<CoreIndex> = (0..expected).filter(|c| !covered.contains(c)).collect();
        if !missing.is_empty() {
            return Err(AffinityError::UncoveredCores { missing });
        }
        if self.total_cores >= workers && claimed != covered.len() {
            return Err(AffinityError::UnexpectedOverlap {
                total_cores: self.total_cores,
                workers,
            });
        }
        Ok(())
    }
}

/// Partition `total_cores` across `workers`.
///
/// - `total_cores == 0`: no limit is known, so nothing is pinned.
/// - `total_cores >= workers.len()`: worker `i` gets a contiguous range;
///   the first `total_cores % n` workers get one extra core so no core is
///   dropped.
/// - `total_cores < workers.len()`: worker `i` shares core `i % total_cores`.
pub fn assign(total_cores: usize, workers: &[WorkerId]) -> AffinityResult<AffinityPlan> {
    let mut seen = HashSet::with_capacity(workers.len());
    for w in workers {
        if !seen.insert(w.as_str()) {
            return Err(AffinityError::DuplicateWorker(w.clone()));
        }
    }

    if total_cores == 0 || workers.is_empty() {
        debug!(total_cores, workers = workers.len(), "affinity left to host scheduler");
        return Ok(AffinityPlan {
            total_cores,
            assignments: Vec::new(),
        });
    }

    let n = workers.len();
    let assignments: Vec<AffinityAssignment> = if total_cores >= n {
        let base = total_cores / n;
        let extra = total_cores % n;
        let mut next = 0;
        workers
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let width = base + usize::from(i < extra);
                let core_set = (next..next + width).collect();
                next += width;
                AffinityAssignment {
                    worker_id: w.clone(),
                    core_set,
                }
            })
            .collect()
    } else {
        workers
            .iter()
            .enumerate()
            .map(|(i, w)| AffinityAssignment {
                worker_id: w.clone(),
                core_set: BTreeSet::from([i % total_cores]),
            })
            .collect()
    };

    let plan = AffinityPlan {
        total_cores,
        assignments,
    };
    plan.validate()?;

    debug!(
        total_cores,
        workers = n,
        shared = total_cores < n,
        "affinity plan computed"
    );
    Ok(plan)
}
