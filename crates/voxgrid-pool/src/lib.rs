//! voxgrid-pool: the deployment-side seam of the autoscaler.
//!
//! The control loop only ever asks a pool to "run N instances of service
//! S" and "pin these workers to these cores". How that happens is up to
//! the `WorkerPoolController` implementation:
//!
//! - **`InMemoryPool`**: bookkeeping only; used by tests and dry runs.
//! - **`ContainerPoolController`**: drives a container CLI (`docker` by
//!   default): one named container per instance, `--cpuset-cpus` updates
//!   for affinity.

pub mod container;
pub mod controller;
pub mod error;
pub mod memory;

pub use container::{CommandRunner, ContainerPoolController, ContainerTemplate, ProcessRunner};
pub use controller::WorkerPoolController;
pub use error::{PoolError, PoolResult};
pub use memory::InMemoryPool;
