//! voxd: the VoxGrid autoscaler daemon.
//!
//! Wires the autoscaler crates into one process:
//! - Configuration from the environment (optionally seeded by a `.env` file)
//! - Usable core detection (cgroup quota, `CPU_CORE_LIMIT` override)
//! - `PrometheusSource` for telemetry
//! - `ContainerPoolController` (or `InMemoryPool` in dry-run mode)
//! - The control loop, stopped by Ctrl-C
//! - `/metrics` and `/healthz` over HTTP
//!
//! # HTTP Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition of scaling activity |
//! | GET | `/healthz` | Liveness and mode |

pub mod daemon;
pub mod http;

pub use daemon::{RunOptions, load_config, plan_affinity, run};
pub use http::{AppState, build_router};
