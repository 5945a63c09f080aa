//! Prometheus metrics for the KMS plugin.
//!
//! Provides counters, histograms, and gauges for observability.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

/// KMS operations counter.
pub static KMS_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kms_encryption_provider_kms_operations_total",
        "Total number of KMS operations",
        &["key_id", "operation", "version", "status"]
    )
    .expect("Failed to register kms_operations metric")
});

/// KMS operation latency histogram.
pub static KMS_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "kms_encryption_provider_kms_latency_seconds",
        "KMS operation latency in seconds",
        &["operation", "version"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register kms_latency metric")
});

/// Classified KMS failures counter.
pub static KMS_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kms_encryption_provider_kms_errors_total",
        "Total number of classified KMS failures",
        &["operation", "category"]
    )
    .expect("Failed to register kms_errors metric")
});

/// Aggregate health gauge (1 = healthy, 0 = unhealthy).
pub static HEALTH_STATUS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "kms_encryption_provider_health_status",
        "Aggregate health verdict of the last evaluation window"
    )
    .expect("Failed to register health_status metric")
});

/// Health signals dropped because the queue was full.
pub static HEALTH_SIGNALS_DROPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kms_encryption_provider_health_signals_dropped_total",
        "Total number of health signals dropped on a full queue"
    )
    .expect("Failed to register health_signals_dropped metric")
});

/// Record a KMS operation and its latency.
pub fn record_kms_operation(
    key_id: &str,
    operation: &str,
    version: &str,
    success: bool,
    latency_secs: f64,
) {
    let status = if success { "success" } else { "failure" };
    KMS_OPERATIONS
        .with_label_values(&[key_id, operation, version, status])
        .inc();
    KMS_LATENCY
        .with_label_values(&[operation, version])
        .observe(latency_secs);
}

/// Record a classified KMS failure.
pub fn record_kms_error(operation: &str, category: &str) {
    KMS_ERRORS.with_label_values(&[operation, category]).inc();
}

/// Publish the aggregate health verdict.
pub fn record_health_status(healthy: bool) {
    HEALTH_STATUS.set(if healthy { 1.0 } else { 0.0 });
}

/// Record a dropped health signal.
pub fn record_health_signal_dropped() {
    HEALTH_SIGNALS_DROPPED.inc();
}

/// Render the default registry in the text exposition format.
pub fn gather() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
