//! Short rolling history of snapshots for one service.

use std::collections::VecDeque;

use voxgrid_core::MetricSnapshot;

/// The last `capacity` snapshots of a service, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotWindow {
    capacity: usize,
    snapshots: VecDeque<MetricSnapshot>,
}

impl SnapshotWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a snapshot, evicting the oldest when full.
    pub fn push(&mut self, snapshot: MetricSnapshot) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<&MetricSnapshot> {
        self.snapshots.back()
    }

    /// The newest `n` snapshots, newest first. Shorter if fewer are held.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &MetricSnapshot> {
        self.snapshots.iter().rev().take(n)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
