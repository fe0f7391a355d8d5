//! Prometheus metrics for the ledger
//!
//! # Metrics
//!
//! - `ledger_transfers_total` - Balance movements by kind and outcome
//! - `ledger_transfer_duration_seconds` - Time from lock request to commit
//! - `ledger_lock_timeouts_total` - Lock acquisitions that timed out

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

lazy_static! {
    /// Balance movements by kind (transfer, execute, reversal, opening) and outcome
    pub static ref LEDGER_TRANSFERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ledger_transfers_total",
        "Total ledger balance movements",
        &["kind", "outcome"]
    )
    .unwrap();

    /// Movement latency including lock wait
    pub static ref LEDGER_TRANSFER_DURATION: Histogram = register_histogram!(
        "ledger_transfer_duration_seconds",
        "Ledger movement duration in seconds",
        vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]
    )
    .unwrap();

    /// Lock acquisitions that hit the configured timeout
    pub static ref LEDGER_LOCK_TIMEOUTS: IntCounter = register_int_counter!(
        "ledger_lock_timeouts_total",
        "Account lock acquisitions that timed out"
    )
    .unwrap();
}

/// Record the outcome of one movement
pub fn record_movement(kind: &str, result: &crate::Result<impl Sized>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(crate::Error::InsufficientBalance { .. }) => "insufficient_balance",
        Err(e) if e.is_retryable() => "retryable_error",
        Err(_) => "error",
    };
    LEDGER_TRANSFERS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}
