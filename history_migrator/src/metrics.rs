//! Prometheus metrics for pipeline history migration.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record the outcome of one legacy record and how long it took.
pub fn record_migrated(outcome: &'static str, duration_ms: u64) {
    counter!("history_records_total", "outcome" => outcome).increment(1);
    histogram!("history_record_duration_ms").record(duration_ms as f64);
}

/// Record a group whose candidates could not be listed.
pub fn group_failed() {
    counter!("history_groups_failed_total").increment(1);
}
