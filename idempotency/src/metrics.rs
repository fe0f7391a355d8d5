//! Prometheus metrics for idempotency

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Lookups by result (hit, conflict, in_progress, miss, disabled)
    pub static ref IDEMPOTENCY_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "idempotency_lookups_total",
        "Idempotency lookups by result",
        &["result"]
    )
    .unwrap();

    /// Durable store failures that were tolerated (fail-open)
    pub static ref IDEMPOTENCY_STORE_ERRORS: IntCounterVec = register_int_counter_vec!(
        "idempotency_store_errors_total",
        "Idempotency store errors by operation",
        &["operation"]
    )
    .unwrap();
}
