//! Prometheus text exposition format.
//!
//! Renders removal latency snapshots as a histogram for scraping by a
//! Prometheus server or compatible agent.

use crate::collector::RemovalLatencySnapshot;

/// Metric name without namespace.
pub const REMOVAL_LATENCY_METRIC: &str = "node_removal_latency_seconds";

/// Render removal latency snapshots into Prometheus text format.
///
/// Produces one HISTOGRAM family with a `deleted` label. An empty
/// `namespace` leaves the metric name unprefixed.
pub fn render_prometheus(namespace: &str, snapshots: &[RemovalLatencySnapshot]) -> String {
    let name = if namespace.is_empty() {
        REMOVAL_LATENCY_METRIC.to_string()
    } else {
        format!("{namespace}_{REMOVAL_LATENCY_METRIC}")
    };

    let mut out = String::new();
    out.push_str(&format!(
        "# HELP {name} Latency from when an unneeded node is eligible for scale down until it is removed or needed again.\n"
    ));
    out.push_str(&format!("# TYPE {name} histogram\n"));

    for s in snapshots {
        let deleted = s.cause.deleted_label();
        for (bound, count) in &s.buckets {
            out.push_str(&format!(
                "{name}_bucket{{deleted=\"{deleted}\",le=\"{bound}\"}} {count}\n"
            ));
        }
        out.push_str(&format!(
            "{name}_bucket{{deleted=\"{deleted}\",le=\"+Inf\"}} {}\n",
            s.count
        ));
        out.push_str(&format!("{name}_sum{{deleted=\"{deleted}\"}} {}\n", s.sum_seconds));
        out.push_str(&format!("{name}_count{{deleted=\"{deleted}\"}} {}\n", s.count));
    }

    out
}
