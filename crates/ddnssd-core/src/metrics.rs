//! Prometheus metrics for the DDNS-SD daemon
//!
//! All metrics live in one registry under the `ddnssd_` namespace and are
//! updated from the event loop only; the HTTP exposition side (port 9218)
//! lives in the daemon binary.

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use prometheus::{CounterVec, Encoder, GaugeVec, IntGauge, Opts, Registry, TextEncoder};

const METRICS_NAMESPACE: &str = "ddnssd";

/// Global metrics registry, exposed via `/metrics` when metrics are enabled.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Daemon start time as a Unix timestamp, labelled with the git revision.
pub static START_TIMESTAMP: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_start_timestamp"),
        "Unix timestamp at which the daemon started",
    );
    let gauge = GaugeVec::new(opts, &["git_revision"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Lifecycle events processed, by event tag.
pub static EVENTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_events_total"),
        "Total number of runtime events processed by tag",
    );
    let counter = CounterVec::new(opts, &["event"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Backend operations, by backend, operation and outcome.
pub static BACKEND_OPS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_backend_ops_total"),
        "Total number of backend operations by backend, operation and status",
    );
    let counter = CounterVec::new(opts, &["backend", "op", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Reconciliation passes, by backend and outcome.
pub static RECONCILE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconcile_total"),
        "Total number of reconciliation passes by backend and status",
    );
    let counter = CounterVec::new(opts, &["backend", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Number of containers currently tracked by the event loop.
pub static CONTAINERS_TRACKED: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        format!("{METRICS_NAMESPACE}_containers_tracked"),
        "Number of containers currently tracked",
    )
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Stamp the start-time gauge; `git_revision` comes from `DDNSSD_GIT_REVISION`.
pub fn mark_start(git_revision: &str) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    START_TIMESTAMP.with_label_values(&[git_revision]).set(now);
}

/// Count one processed event.
pub fn record_event(tag: &str) {
    EVENTS_TOTAL.with_label_values(&[tag]).inc();
}

/// Count one backend operation.
pub fn record_backend_op(backend: &str, op: &str, ok: bool) {
    let status = if ok { "success" } else { "error" };
    BACKEND_OPS_TOTAL
        .with_label_values(&[backend, op, status])
        .inc();
}

/// Count one reconciliation pass.
pub fn record_reconcile(backend: &str, ok: bool) {
    let status = if ok { "success" } else { "error" };
    RECONCILE_TOTAL.with_label_values(&[backend, status]).inc();
}

/// Update the tracked-container gauge.
pub fn set_containers_tracked(count: usize) {
    CONTAINERS_TRACKED.set(count as i64);
}

/// Gather and encode all metrics in Prometheus text format.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
