//! voxgrid-affinity: partitions usable CPU cores among workers.
//!
//! # Components
//!
//! - **`allocator`**: `assign(total_cores, workers)` hands out contiguous ranges
//!   when cores outnumber workers, round-robin sharing otherwise, no
//!   pinning at all when the core count is unknown (0).
//! - **`limits`**: reads the container CPU quota (cgroup v2 `cpu.max`,
//!   cgroup v1 CFS quota) to find how many cores the pool may use.

pub mod allocator;
pub mod error;
pub mod limits;

pub use allocator::{AffinityPlan, assign};
pub use error::{AffinityError, AffinityResult};
pub use limits::{CGROUP_ROOT, CpuLimit, detect_cpu_limit, effective_core_count, host_parallelism};
