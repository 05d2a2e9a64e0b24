//! Controller metrics.
//!
//! Prometheus counters and histograms for the admission pipeline and the
//! commit/reload cycle.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Router metrics registry.
    pub static ref ROUTER_METRICS_REGISTRY: Registry = Registry::new();

    /// Admission verdicts by result and reason.
    static ref ROUTE_ADMISSIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "route_admissions_total",
            "Total number of route admission verdicts",
        );
        let counter = IntCounterVec::new(opts, &["result", "reason"])
            .expect("Failed to create counter");
        ROUTER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Time spent committing state to the backend (write + reload).
    static ref COMMIT_DURATION_SECONDS: Histogram = {
        let opts = HistogramOpts::new(
            "router_commit_duration_seconds",
            "Time spent committing router state to the backend in seconds",
        );
        let histogram = Histogram::with_opts(opts).expect("Failed to create histogram");
        ROUTER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Commit attempts by result.
    static ref COMMITS_TOTAL: IntCounterVec = {
        let opts = Opts::new("router_commits_total", "Total number of backend commits");
        let counter =
            IntCounterVec::new(opts, &["result"]).expect("Failed to create counter");
        ROUTER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Route status writes by result.
    static ref STATUS_WRITES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "route_status_writes_total",
            "Total number of route status write attempts",
        );
        let counter =
            IntCounterVec::new(opts, &["result"]).expect("Failed to create counter");
        ROUTER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };
}

/// Record an admission verdict. `reason` is empty for admitted routes.
pub fn record_admission(result: &str, reason: &str) {
    ROUTE_ADMISSIONS_TOTAL
        .with_label_values(&[result, reason])
        .inc();
}

/// Record a commit attempt with its duration.
pub fn record_commit(duration_secs: f64, result: &str) {
    COMMIT_DURATION_SECONDS.observe(duration_secs);
    COMMITS_TOTAL.with_label_values(&[result]).inc();
}

/// Record a status write attempt: "written", "skipped", "conflict",
/// "dropped", or "error".
pub fn record_status_write(result: &str) {
    STATUS_WRITES_TOTAL.with_label_values(&[result]).inc();
}

/// Gather router metrics in Prometheus text exposition format.
pub fn gather_router_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = ROUTER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}
