//! Prometheus metrics for settlement
//!
//! # Metrics
//!
//! - `settlement_attempts_total` - Adapter calls by rail and outcome
//! - `settlement_attempt_duration_seconds` - Adapter call latency by rail
//! - `settlement_routing_decisions_total` - Selected rail per decision
//! - `settlement_window_cycles_total` - Scheduler cycles
//! - `settlement_window_items_total` - Queue items by rail and outcome

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};

lazy_static! {
    /// Adapter calls by rail and outcome (success, retryable, terminal, timeout)
    pub static ref SETTLEMENT_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_attempts_total",
        "Total rail adapter calls",
        &["rail", "outcome"]
    )
    .unwrap();

    /// Adapter call latency
    pub static ref SETTLEMENT_ATTEMPT_DURATION: HistogramVec = register_histogram_vec!(
        "settlement_attempt_duration_seconds",
        "Rail adapter call duration in seconds",
        &["rail"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    /// Routing decisions by selected rail
    pub static ref ROUTING_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_routing_decisions_total",
        "Total routing decisions by selected rail",
        &["rail"]
    )
    .unwrap();

    /// Scheduler cycles run
    pub static ref WINDOW_CYCLES_TOTAL: IntCounter = register_int_counter!(
        "settlement_window_cycles_total",
        "Total settlement window scheduler cycles"
    )
    .unwrap();

    /// Queue items processed by rail and outcome (settled, failed)
    pub static ref WINDOW_ITEMS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_window_items_total",
        "Total queue items processed by the window scheduler",
        &["rail", "outcome"]
    )
    .unwrap();
}
