//! Prometheus metrics for the search layer.
//!
//! Metrics are plain `lazy_static` collectors and can be updated before
//! registration; `init_metrics` adds them to the crate registry once at
//! startup and `gather_metrics` renders it in the text exposition format.
//!
//! # Example
//! ```no_run
//! use tenant_search::metrics::{gather_metrics, init_metrics, SEARCH_OPERATIONS_TOTAL};
//!
//! init_metrics().expect("metrics registered once");
//! SEARCH_OPERATIONS_TOTAL
//!     .with_label_values(&["find", "tantivy", "ok"])
//!     .inc();
//! println!("{}", gather_metrics());
//! ```

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::time::Instant;

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Facade operations executed
    ///
    /// Labels: operation, backend, outcome
    pub static ref SEARCH_OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("operations_total", "Total number of search operations")
            .namespace("tenant_search"),
        &["operation", "backend", "outcome"]
    ).expect("Failed to create SEARCH_OPERATIONS_TOTAL metric");

    /// Facade operation duration in seconds
    ///
    /// Labels: operation, backend
    pub static ref SEARCH_OPERATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "operation_duration_seconds",
            "Search operation duration in seconds"
        )
        .namespace("tenant_search")
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["operation", "backend"]
    ).expect("Failed to create SEARCH_OPERATION_DURATION_SECONDS metric");

    /// Records dropped because they could not be hydrated
    pub static ref HYDRATION_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("hydration_failures_total", "Records dropped during hydration")
            .namespace("tenant_search")
    ).expect("Failed to create HYDRATION_FAILURES_TOTAL metric");

    /// Objects a batch operation failed to apply
    ///
    /// Labels: operation, backend
    pub static ref BATCH_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("batch_failures_total", "Objects not applied by batch operations")
            .namespace("tenant_search"),
        &["operation", "backend"]
    ).expect("Failed to create BATCH_FAILURES_TOTAL metric");
}

/// Register all metrics with the crate registry
///
/// Call once at startup; a second call fails with `AlreadyReg`.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(SEARCH_OPERATIONS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SEARCH_OPERATION_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HYDRATION_FAILURES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(BATCH_FAILURES_TOTAL.clone()))?;

    tracing::debug!("Search metrics registered");
    Ok(())
}

/// Record the outcome and latency of one facade operation
pub fn record_operation(operation: &str, backend: &str, started: Instant, ok: bool) {
    SEARCH_OPERATIONS_TOTAL
        .with_label_values(&[operation, backend, if ok { "ok" } else { "error" }])
        .inc();
    SEARCH_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, backend])
        .observe(started.elapsed().as_secs_f64());
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
