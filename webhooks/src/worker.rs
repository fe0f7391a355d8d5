//! Delivery worker
//!
//! Each cycle claims due deliveries (`pending`, or `failed` with
//! `next_retry_at <= now`) and makes one attempt per delivery:
//!
//! - 2xx: `delivered`
//! - anything else: `failed`, rescheduled at
//!   `now + min(base * 2^(attempts-1), cap)`
//! - failure at `max_attempts`: `dlq`, never claimed again
//! - storage error mid-attempt: back to `failed` with a backoff, so the
//!   claim never strands the delivery in `processing`
//!
//! Retries are never made inline; a failing receiver only delays its own
//! deliveries.

use crate::config::WebhookConfig;
use crate::error::{Result, WebhookError};
use crate::metrics::{WEBHOOK_DELIVERIES_TOTAL, WEBHOOK_DELIVERY_DURATION, WEBHOOK_DLQ_PURGED_TOTAL};
use crate::signing::{signature_header, EVENT_HEADER, ID_HEADER, SIGNATURE_HEADER};
use crate::store::WebhookStore;
use crate::transport::{OutboundRequest, WebhookTransport};
use crate::types::{DeliveryStatus, WebhookDelivery};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Result of one delivery cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Deliveries claimed
    pub claimed: usize,
    /// Delivered this cycle
    pub delivered: usize,
    /// Failed and rescheduled
    pub failed: usize,
    /// Moved to the DLQ
    pub dead_lettered: usize,
}

/// Sends due deliveries
pub struct DeliveryWorker {
    store: Arc<dyn WebhookStore>,
    transport: Arc<dyn WebhookTransport>,
    config: WebhookConfig,
}

impl DeliveryWorker {
    /// Create worker
    pub fn new(store: Arc<dyn WebhookStore>, transport: Arc<dyn WebhookTransport>, config: WebhookConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Delay before the retry following attempt number `attempts`
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32);
        let secs = self
            .config
            .backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.config.backoff_cap_secs);
        Duration::seconds(secs as i64)
    }

    /// Claim and attempt every due delivery
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<WorkerStats> {
        let claimed = self.store.claim_due(now, self.config.batch_size)?;
        let mut stats = WorkerStats {
            claimed: claimed.len(),
            ..WorkerStats::default()
        };

        for delivery in claimed {
            let id = delivery.id;
            match self.deliver(delivery, now).await {
                Ok(done) => match done.status {
                    DeliveryStatus::Delivered => stats.delivered += 1,
                    DeliveryStatus::Dlq => stats.dead_lettered += 1,
                    _ => stats.failed += 1,
                },
                Err(e) => {
                    error!(delivery_id = %id, "Failed to record delivery attempt: {}", e);
                    stats.failed += 1;
                }
            }
        }

        if stats.claimed > 0 {
            info!(
                claimed = stats.claimed,
                delivered = stats.delivered,
                failed = stats.failed,
                dead_lettered = stats.dead_lettered,
                "Webhook delivery cycle"
            );
        }
        Ok(stats)
    }

    /// Make one attempt for a claimed delivery and persist the outcome
    pub async fn deliver(&self, delivery: WebhookDelivery, now: DateTime<Utc>) -> Result<WebhookDelivery> {
        match self.attempt(delivery.clone(), now).await {
            Ok(done) => Ok(done),
            Err(e) => {
                self.release(delivery, &e, now);
                Err(e)
            }
        }
    }

    async fn attempt(&self, mut delivery: WebhookDelivery, now: DateTime<Utc>) -> Result<WebhookDelivery> {
        let endpoint = match self.store.get_endpoint(delivery.endpoint_id)? {
            Some(endpoint) if endpoint.active => endpoint,
            Some(_) => return self.dead_letter(delivery, "Endpoint is disabled", now),
            None => return self.dead_letter(delivery, "Endpoint no longer exists", now),
        };

        let body = serde_json::to_vec(&delivery.payload)?;
        let request = OutboundRequest {
            url: endpoint.url.clone(),
            headers: vec![
                (
                    SIGNATURE_HEADER.to_string(),
                    signature_header(&endpoint.live_secrets(now), now.timestamp(), &body),
                ),
                (ID_HEADER.to_string(), delivery.id.to_string()),
                (EVENT_HEADER.to_string(), delivery.event_type.to_string()),
            ],
            body,
        };

        let started = Instant::now();
        let outcome = self.transport.send(&request).await;
        WEBHOOK_DELIVERY_DURATION.observe(started.elapsed().as_secs_f64());

        delivery.attempts += 1;
        delivery.updated_at = now;

        let error = match outcome {
            Ok(response) if response.is_success() => {
                delivery.status = DeliveryStatus::Delivered;
                delivery.last_response_code = Some(response.status);
                delivery.last_error = None;
                delivery.next_retry_at = None;
                delivery.delivered_at = Some(now);
                self.store.update_delivery(delivery.clone())?;

                WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["delivered"]).inc();
                debug!(
                    delivery_id = %delivery.id,
                    endpoint_id = %delivery.endpoint_id,
                    attempts = delivery.attempts,
                    "Webhook delivered"
                );
                return Ok(delivery);
            }
            Ok(response) => {
                delivery.last_response_code = Some(response.status);
                format!("Receiver responded with HTTP {}", response.status)
            }
            Err(e) => {
                delivery.last_response_code = None;
                e
            }
        };

        if delivery.attempts >= self.config.max_attempts {
            return self.dead_letter(delivery, &error, now);
        }

        delivery.status = DeliveryStatus::Failed;
        delivery.next_retry_at = Some(now + self.backoff(delivery.attempts));
        delivery.last_error = Some(error);
        self.store.update_delivery(delivery.clone())?;

        WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["failed"]).inc();
        warn!(
            delivery_id = %delivery.id,
            attempts = delivery.attempts,
            next_retry_at = ?delivery.next_retry_at,
            error = ?delivery.last_error,
            "Webhook delivery failed"
        );
        Ok(delivery)
    }

    /// Return a claimed delivery to the retry queue after a storage error
    fn release(&self, mut delivery: WebhookDelivery, cause: &WebhookError, now: DateTime<Utc>) {
        delivery.status = DeliveryStatus::Failed;
        delivery.next_retry_at = Some(now + self.backoff(delivery.attempts.max(1)));
        delivery.last_error = Some(cause.to_string());
        delivery.updated_at = now;

        let id = delivery.id;
        match self.store.update_delivery(delivery) {
            Ok(()) => warn!(delivery_id = %id, "Delivery released for retry after error: {}", cause),
            Err(e) => error!(delivery_id = %id, "Failed to release delivery: {}", e),
        }
    }

    fn dead_letter(&self, mut delivery: WebhookDelivery, reason: &str, now: DateTime<Utc>) -> Result<WebhookDelivery> {
        delivery.status = DeliveryStatus::Dlq;
        delivery.next_retry_at = None;
        delivery.last_error = Some(reason.to_string());
        delivery.updated_at = now;
        self.store.update_delivery(delivery.clone())?;

        WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["dlq"]).inc();
        warn!(
            delivery_id = %delivery.id,
            endpoint_id = %delivery.endpoint_id,
            attempts = delivery.attempts,
            "Webhook moved to DLQ: {}",
            reason
        );
        Ok(delivery)
    }

    /// Purge DLQ deliveries older than the retention window
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(self.config.dlq_retention_days);
        let purged = self.store.purge_dlq(cutoff)?;
        if purged > 0 {
            WEBHOOK_DLQ_PURGED_TOTAL.inc_by(purged as f64);
            info!(purged, "Purged dead-lettered webhook deliveries");
        }
        Ok(purged)
    }

    /// Delivery and cleanup loops until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            cleanup_interval_secs = self.config.cleanup_interval_secs,
            "Starting webhook delivery worker"
        );
        let mut deliveries =
            tokio::time::interval(std::time::Duration::from_secs(self.config.poll_interval_secs));
        let mut cleanup =
            tokio::time::interval(std::time::Duration::from_secs(self.config.cleanup_interval_secs));

        loop {
            tokio::select! {
                _ = deliveries.tick() => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        error!("Webhook delivery cycle failed: {}", e);
                    }
                }
                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup_at(Utc::now()) {
                        error!("Webhook cleanup failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Webhook delivery worker stopped");
    }
}

impl std::fmt::Debug for DeliveryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryWorker")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::verify;
    use crate::store::MemoryWebhookStore;
    use crate::transport::MemoryTransport;
    use crate::types::{DeliveryStats, EventType, TenantId, WebhookEndpoint};
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryWebhookStore>,
        transport: Arc<MemoryTransport>,
        worker: DeliveryWorker,
        endpoint: WebhookEndpoint,
    }

    fn fixture(status: u16) -> Fixture {
        let store = Arc::new(MemoryWebhookStore::new());
        let transport = Arc::new(MemoryTransport::with_status(status));
        let worker = DeliveryWorker::new(store.clone(), transport.clone(), WebhookConfig::default());

        let now = Utc::now();
        let endpoint = WebhookEndpoint {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            url: "https://receiver.example/hooks".to_string(),
            description: None,
            event_types: vec![],
            secret: "whsec_test".to_string(),
            previous_secret: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_endpoint(endpoint.clone()).unwrap();

        Fixture {
            store,
            transport,
            worker,
            endpoint,
        }
    }

    fn queue(f: &Fixture, now: DateTime<Utc>) -> WebhookDelivery {
        let delivery = WebhookDelivery::new(
            f.endpoint.tenant_id,
            f.endpoint.id,
            EventType::TransferCompleted,
            Uuid::new_v4(),
            serde_json::json!({"transfer_id": "t-1"}),
            now,
        );
        f.store.insert_delivery(delivery.clone()).unwrap();
        delivery
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let f = fixture(200);
        assert_eq!(f.worker.backoff(1), Duration::seconds(30));
        assert_eq!(f.worker.backoff(2), Duration::seconds(60));
        assert_eq!(f.worker.backoff(3), Duration::seconds(120));
        assert_eq!(f.worker.backoff(10), Duration::seconds(3600));
        assert_eq!(f.worker.backoff(200), Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_successful_delivery_is_signed() {
        let f = fixture(200);
        let now = Utc::now();
        let delivery = queue(&f, now);

        let stats = f.worker.run_cycle(now).await.unwrap();
        assert_eq!(stats.delivered, 1);

        let stored = f.store.get_delivery(delivery.id).unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_response_code, Some(200));
        assert!(stored.delivered_at.is_some());

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        let signature = sent[0].header(SIGNATURE_HEADER).unwrap();
        assert!(verify(signature, "whsec_test", &sent[0].body, now.timestamp(), 300));
        assert_eq!(sent[0].header(ID_HEADER), Some(delivery.id.to_string().as_str()));
        assert_eq!(sent[0].header(EVENT_HEADER), Some("transfer.completed"));
    }

    #[tokio::test]
    async fn test_failure_reschedules_without_inline_retry() {
        let f = fixture(503);
        let now = Utc::now();
        let delivery = queue(&f, now);

        let stats = f.worker.run_cycle(now).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(f.transport.sent().len(), 1);

        let stored = f.store.get_delivery(delivery.id).unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.last_response_code, Some(503));
        assert_eq!(stored.next_retry_at, Some(now + Duration::seconds(30)));

        // Not due yet
        let stats = f.worker.run_cycle(now + Duration::seconds(10)).await.unwrap();
        assert_eq!(stats.claimed, 0);

        f.transport.push(Ok(204));
        let stats = f.worker.run_cycle(now + Duration::seconds(30)).await.unwrap();
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_always_failing_delivery_ends_in_dlq() {
        let f = fixture(500);
        let mut now = Utc::now();
        let delivery = queue(&f, now);

        for attempt in 1..=5 {
            let stats = f.worker.run_cycle(now).await.unwrap();
            assert_eq!(stats.claimed, 1, "attempt {}", attempt);
            now = now + Duration::hours(2);
        }

        let stored = f.store.get_delivery(delivery.id).unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Dlq);
        assert_eq!(stored.attempts, 5);
        assert!(stored.next_retry_at.is_none());

        let stats = f.worker.run_cycle(now + Duration::days(1)).await.unwrap();
        assert_eq!(stats.claimed, 0);
        assert_eq!(f.transport.sent().len(), 5);
    }

    #[tokio::test]
    async fn test_transport_error_counts_as_failure() {
        let f = fixture(200);
        let now = Utc::now();
        let delivery = queue(&f, now);
        f.transport.push(Err("connection refused".to_string()));

        f.worker.run_cycle(now).await.unwrap();
        let stored = f.store.get_delivery(delivery.id).unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.last_response_code, None);
        assert_eq!(stored.last_error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_deleted_endpoint_dead_letters() {
        let f = fixture(200);
        let now = Utc::now();
        let delivery = queue(&f, now);
        f.store.delete_endpoint(f.endpoint.id).unwrap();

        let stats = f.worker.run_cycle(now).await.unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert!(f.transport.sent().is_empty());
        assert_eq!(
            f.store.get_delivery(delivery.id).unwrap().unwrap().status,
            DeliveryStatus::Dlq
        );
    }

    #[tokio::test]
    async fn test_cleanup_purges_old_dlq() {
        let f = fixture(200);
        let now = Utc::now();
        let mut delivery = queue(&f, now - Duration::days(8));
        delivery.status = DeliveryStatus::Dlq;
        delivery.updated_at = now - Duration::days(8);
        f.store.update_delivery(delivery.clone()).unwrap();

        assert_eq!(f.worker.cleanup_at(now).unwrap(), 1);
        assert!(f.store.get_delivery(delivery.id).unwrap().is_none());
    }

    /// Delegates to memory, with endpoint lookups failing on demand
    struct FlakyStore {
        inner: Arc<MemoryWebhookStore>,
        down: AtomicBool,
    }

    impl WebhookStore for FlakyStore {
        fn insert_endpoint(&self, endpoint: WebhookEndpoint) -> Result<()> {
            self.inner.insert_endpoint(endpoint)
        }
        fn get_endpoint(&self, id: Uuid) -> Result<Option<WebhookEndpoint>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(WebhookError::Storage("connection reset".to_string()));
            }
            self.inner.get_endpoint(id)
        }
        fn update_endpoint(&self, endpoint: WebhookEndpoint) -> Result<()> {
            self.inner.update_endpoint(endpoint)
        }
        fn delete_endpoint(&self, id: Uuid) -> Result<bool> {
            self.inner.delete_endpoint(id)
        }
        fn list_endpoints(&self, tenant_id: TenantId) -> Result<Vec<WebhookEndpoint>> {
            self.inner.list_endpoints(tenant_id)
        }
        fn insert_delivery(&self, delivery: WebhookDelivery) -> Result<()> {
            self.inner.insert_delivery(delivery)
        }
        fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>> {
            self.inner.get_delivery(id)
        }
        fn update_delivery(&self, delivery: WebhookDelivery) -> Result<()> {
            self.inner.update_delivery(delivery)
        }
        fn list_deliveries(&self, tenant_id: TenantId, status: Option<DeliveryStatus>) -> Result<Vec<WebhookDelivery>> {
            self.inner.list_deliveries(tenant_id, status)
        }
        fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WebhookDelivery>> {
            self.inner.claim_due(now, limit)
        }
        fn reschedule(&self, tenant_id: TenantId, id: Uuid, now: DateTime<Utc>) -> Result<WebhookDelivery> {
            self.inner.reschedule(tenant_id, id, now)
        }
        fn stats(&self, tenant_id: TenantId) -> Result<DeliveryStats> {
            self.inner.stats(tenant_id)
        }
        fn purge_dlq(&self, before: DateTime<Utc>) -> Result<usize> {
            self.inner.purge_dlq(before)
        }
    }

    #[tokio::test]
    async fn test_storage_error_releases_claim() {
        let f = fixture(200);
        let store = Arc::new(FlakyStore {
            inner: f.store.clone(),
            down: AtomicBool::new(true),
        });
        let worker = DeliveryWorker::new(store.clone(), f.transport.clone(), WebhookConfig::default());
        let now = Utc::now();
        let delivery = queue(&f, now);

        let stats = worker.run_cycle(now).await.unwrap();
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.failed, 1);
        assert!(f.transport.sent().is_empty());

        let stored = f.store.get_delivery(delivery.id).unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.attempts, 0);
        assert_eq!(stored.next_retry_at, Some(now + Duration::seconds(30)));
        assert!(stored.last_error.unwrap().contains("connection reset"));

        store.down.store(false, Ordering::SeqCst);
        assert_eq!(worker.run_cycle(now + Duration::seconds(10)).await.unwrap().claimed, 0);
        let stats = worker.run_cycle(now + Duration::seconds(30)).await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(
            f.store.get_delivery(delivery.id).unwrap().unwrap().status,
            DeliveryStatus::Delivered
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(200);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::new(f.worker).run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
