//! Prometheus metrics for webhook delivery

use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Histogram};

lazy_static! {
    /// Delivery attempts by outcome (delivered, failed, dlq)
    pub static ref WEBHOOK_DELIVERIES_TOTAL: CounterVec = register_counter_vec!(
        "webhook_deliveries_total",
        "Webhook delivery attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Time spent waiting for receivers
    pub static ref WEBHOOK_DELIVERY_DURATION: Histogram = register_histogram!(
        "webhook_delivery_duration_seconds",
        "Webhook request duration",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// DLQ deliveries removed by retention cleanup
    pub static ref WEBHOOK_DLQ_PURGED_TOTAL: Counter = register_counter!(
        "webhook_dlq_purged_total",
        "Dead-lettered deliveries purged after retention"
    )
    .unwrap();
}
