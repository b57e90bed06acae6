//! Prometheus metrics for procurement-service.

use once_cell::sync::Lazy;
use prometheus::{
    Counter, CounterVec, HistogramVec, TextEncoder, register_counter, register_counter_vec,
    register_histogram_vec,
};

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "procurement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Allocation engine run counter by trigger.
pub static ALLOCATION_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "procurement_allocation_runs_total",
        "Total number of allocation engine runs",
        &["trigger"] // approve, recalculate, close
    )
    .expect("Failed to register allocation_runs_total")
});

/// Invoice counter by type.
pub static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "procurement_invoices_total",
        "Total number of invoices created by type",
        &["invoice_type"]
    )
    .expect("Failed to register invoices_total")
});

/// Closed invoice counter.
pub static INVOICES_CLOSED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "procurement_invoices_closed_total",
        "Total number of invoices closed"
    )
    .expect("Failed to register invoices_closed_total")
});

/// Lot lock failures during close. Feeds the operator alert path: a close
/// committed but some lots could not be cost-locked.
pub static LOT_LOCK_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "procurement_lot_lock_failures_total",
        "Total receiving lots that failed to lock during invoice close"
    )
    .expect("Failed to register lot_lock_failures_total")
});

/// Allocated cost counter by bucket.
pub static ALLOCATED_COST_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "procurement_allocated_cost_total",
        "Total cost allocated by bucket",
        &["bucket"] // freight, duty, other
    )
    .expect("Failed to register allocated_cost_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "procurement_errors_total",
        "Total number of domain rejections by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ALLOCATION_RUNS_TOTAL);
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&INVOICES_CLOSED_TOTAL);
    Lazy::force(&LOT_LOCK_FAILURES_TOTAL);
    Lazy::force(&ALLOCATED_COST_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
