//! Prometheus metrics for fee-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// HTTP request counter by route and status class.
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_http_requests_total",
        "Total number of HTTP requests",
        &["route", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// Payment counter by method and outcome.
pub static PAYMENTS_RECORDED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_payments_recorded_total",
        "Total number of payments recorded",
        &["method", "status"]
    )
    .expect("Failed to register payments_recorded")
});

/// Webhook deliveries by event type and outcome.
pub static WEBHOOK_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_webhook_events_total",
        "Total number of gateway webhook deliveries",
        &["event", "outcome"] // processed, duplicate, ignored, rejected
    )
    .expect("Failed to register webhook_events_total")
});

/// Ledger CAS save attempts by outcome.
pub static LEDGER_SAVES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_saves_total",
        "Total number of ledger save attempts",
        &["outcome"] // ok, conflict
    )
    .expect("Failed to register ledger_saves_total")
});

/// Semester upgrades by outcome.
pub static UPGRADES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_semester_upgrades_total",
        "Total number of semester upgrade attempts",
        &["outcome"] // completed, failed, rolled_back
    )
    .expect("Failed to register semester_upgrades_total")
});

/// Store operation duration histogram.
pub static STORE_OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fee_store_op_duration_seconds",
        "Store operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register store_op_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&PAYMENTS_RECORDED);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);
    Lazy::force(&LEDGER_SAVES_TOTAL);
    Lazy::force(&UPGRADES_TOTAL);
    Lazy::force(&STORE_OP_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
