//! Prometheus text exposition format.
//!
//! Renders a `TelemetrySnapshot` for scraping by a Prometheus server or
//! compatible agent.

use crate::collector::TelemetrySnapshot;

/// Render autoscaler telemetry into Prometheus text format.
pub fn render_prometheus(snapshot: &TelemetrySnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP voxgrid_service_instances Current instance count per service.\n");
    out.push_str("# TYPE voxgrid_service_instances gauge\n");
    for (service, count) in &snapshot.instances {
        out.push_str(&format!(
            "voxgrid_service_instances{{service=\"{}\"}} {}\n",
            escape(service),
            count
        ));
    }

    out.push_str("# HELP voxgrid_scale_actions_total Applied scale actions.\n");
    out.push_str("# TYPE voxgrid_scale_actions_total counter\n");
    for ((service, direction), count) in &snapshot.scale_actions {
        out.push_str(&format!(
            "voxgrid_scale_actions_total{{service=\"{}\",direction=\"{}\"}} {}\n",
            escape(service),
            direction,
            count
        ));
    }

    out.push_str("# HELP voxgrid_worker_affinity_cores Cores in each worker's affinity set (0 = unpinned).\n");
    out.push_str("# TYPE voxgrid_worker_affinity_cores gauge\n");
    for (worker, cores) in &snapshot.affinity_cores {
        out.push_str(&format!(
            "voxgrid_worker_affinity_cores{{worker=\"{}\"}} {}\n",
            escape(worker),
            cores
        ));
    }

    out.push_str("# HELP voxgrid_apply_failures_total Scale actions the worker pool failed to apply.\n");
    out.push_str("# TYPE voxgrid_apply_failures_total counter\n");
    for (service, count) in &snapshot.apply_failures {
        out.push_str(&format!(
            "voxgrid_apply_failures_total{{service=\"{}\"}} {}\n",
            escape(service),
            count
        ));
    }

    out.push_str("# HELP voxgrid_telemetry_gaps_total Ticks where a service had no usable telemetry.\n");
    out.push_str("# TYPE voxgrid_telemetry_gaps_total counter\n");
    for (service, count) in &snapshot.telemetry_gaps {
        out.push_str(&format!(
            "voxgrid_telemetry_gaps_total{{service=\"{}\"}} {}\n",
            escape(service),
            count
        ));
    }

    out
}

/// Escape a label value (`\`, `"` and newlines).
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
