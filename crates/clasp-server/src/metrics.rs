// Metrics module for observability
// Describes the lock metrics and the workload counters, and renders them in
// Prometheus text format when a recorder is installed

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install a Prometheus recorder as the global metrics recorder
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    // Cluster lock metrics
    describe_counter!(
        "clasp_lock_acquire_total",
        "Total number of cluster lock acquisition attempts by result"
    );
    describe_counter!(
        "clasp_lock_release_total",
        "Total number of cluster locks released or yielded"
    );
    describe_counter!(
        "clasp_lock_remote_requests_total",
        "Total number of remote lock requests answered by flag"
    );
    describe_gauge!("clasp_lock_held", "Number of cluster locks held by a node");

    // Workload metrics
    describe_counter!(
        "clasp_workload_violations_total",
        "Total number of mutual exclusion violations observed by the workload"
    );
    describe_histogram!(
        "clasp_workload_lock_duration_seconds",
        "Time taken by a cluster lock attempt"
    );

    tracing::info!("Metrics initialized");
}

/// Record a lock attempt made by the workload
pub fn record_lock_attempt(policy: &str, acquired: bool, duration_secs: f64) {
    histogram!(
        "clasp_workload_lock_duration_seconds",
        "policy" => policy.to_string(),
        "acquired" => acquired.to_string()
    )
    .record(duration_secs);
}

/// Record a mutual exclusion violation
pub fn record_violation(kind: &'static str) {
    counter!("clasp_workload_violations_total", "kind" => kind).increment(1);
}
