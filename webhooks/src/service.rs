//! Endpoint management and event fan-out
//!
//! Every lookup is tenant-scoped: another tenant's endpoint or delivery
//! reads as not found.

use crate::config::WebhookConfig;
use crate::error::{Result, WebhookError};
use crate::signing::generate_secret;
use crate::store::WebhookStore;
use crate::transport::WebhookTransport;
use crate::types::{
    DeliveryStats, DeliveryStatus, EndpointUpdate, EventEnvelope, EventType, NewEndpoint, RetiringSecret, TenantId,
    WebhookDelivery, WebhookEndpoint,
};
use crate::worker::DeliveryWorker;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Webhook management and emission
pub struct WebhookService {
    store: Arc<dyn WebhookStore>,
    worker: Arc<DeliveryWorker>,
    config: WebhookConfig,
}

impl WebhookService {
    /// Create service and its delivery worker
    pub fn new(store: Arc<dyn WebhookStore>, transport: Arc<dyn WebhookTransport>, config: WebhookConfig) -> Self {
        let worker = Arc::new(DeliveryWorker::new(store.clone(), transport, config.clone()));
        Self { store, worker, config }
    }

    /// The delivery worker (spawn `run` on it)
    pub fn worker(&self) -> Arc<DeliveryWorker> {
        self.worker.clone()
    }

    /// Register an endpoint with a fresh secret
    pub fn create_endpoint(&self, tenant_id: TenantId, new: NewEndpoint) -> Result<WebhookEndpoint> {
        validate_url(&new.url)?;
        let now = Utc::now();
        let endpoint = WebhookEndpoint {
            id: Uuid::new_v4(),
            tenant_id,
            url: new.url,
            description: new.description,
            event_types: new.event_types,
            secret: generate_secret(),
            previous_secret: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_endpoint(endpoint.clone())?;

        info!(tenant_id = %tenant_id, endpoint_id = %endpoint.id, url = %endpoint.url, "Webhook endpoint created");
        Ok(endpoint)
    }

    /// Endpoints of a tenant
    pub fn list_endpoints(&self, tenant_id: TenantId) -> Result<Vec<WebhookEndpoint>> {
        self.store.list_endpoints(tenant_id)
    }

    /// One endpoint
    pub fn get_endpoint(&self, tenant_id: TenantId, id: Uuid) -> Result<WebhookEndpoint> {
        self.store
            .get_endpoint(id)?
            .filter(|e| e.tenant_id == tenant_id)
            .ok_or(WebhookError::EndpointNotFound(id))
    }

    /// Apply a partial update; `rotate_secret` keeps the old secret
    /// signing for the grace period
    pub fn update_endpoint(&self, tenant_id: TenantId, id: Uuid, update: EndpointUpdate) -> Result<WebhookEndpoint> {
        let mut endpoint = self.get_endpoint(tenant_id, id)?;
        let now = Utc::now();

        if let Some(url) = update.url {
            validate_url(&url)?;
            endpoint.url = url;
        }
        if let Some(description) = update.description {
            endpoint.description = Some(description);
        }
        if let Some(event_types) = update.event_types {
            endpoint.event_types = event_types;
        }
        if let Some(active) = update.active {
            endpoint.active = active;
        }
        if update.rotate_secret {
            let retiring = std::mem::replace(&mut endpoint.secret, generate_secret());
            endpoint.previous_secret = Some(RetiringSecret {
                secret: retiring,
                retires_at: now + Duration::hours(self.config.secret_grace_period_hours),
            });
            info!(endpoint_id = %id, "Webhook secret rotated");
        }
        endpoint.updated_at = now;

        self.store.update_endpoint(endpoint.clone())?;
        Ok(endpoint)
    }

    /// Remove an endpoint; its pending deliveries dead-letter
    pub fn delete_endpoint(&self, tenant_id: TenantId, id: Uuid) -> Result<()> {
        self.get_endpoint(tenant_id, id)?;
        self.store.delete_endpoint(id)?;
        info!(tenant_id = %tenant_id, endpoint_id = %id, "Webhook endpoint deleted");
        Ok(())
    }

    /// Queue `event_type` for every active subscribed endpoint
    pub fn emit(&self, tenant_id: TenantId, event_type: EventType, data: serde_json::Value) -> Result<Vec<WebhookDelivery>> {
        self.emit_at(tenant_id, event_type, data, Utc::now())
    }

    /// `emit` with an explicit clock
    pub fn emit_at(
        &self,
        tenant_id: TenantId,
        event_type: EventType,
        data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>> {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            event_type,
            tenant_id,
            created_at: now,
            data,
        };
        let payload = serde_json::to_value(&envelope)?;

        let mut deliveries = Vec::new();
        for endpoint in self.store.list_endpoints(tenant_id)? {
            if !endpoint.active || !endpoint.subscribes_to(event_type) {
                continue;
            }
            let delivery = WebhookDelivery::new(tenant_id, endpoint.id, event_type, envelope.id, payload.clone(), now);
            self.store.insert_delivery(delivery.clone())?;
            deliveries.push(delivery);
        }

        if !deliveries.is_empty() {
            info!(
                tenant_id = %tenant_id,
                event_id = %envelope.id,
                event_type = %event_type,
                deliveries = deliveries.len(),
                "Webhook event queued"
            );
        }
        Ok(deliveries)
    }

    /// Counts per status
    pub fn stats(&self, tenant_id: TenantId) -> Result<DeliveryStats> {
        self.store.stats(tenant_id)
    }

    /// Deliveries, optionally filtered by status
    pub fn deliveries(&self, tenant_id: TenantId, status: Option<DeliveryStatus>) -> Result<Vec<WebhookDelivery>> {
        self.store.list_deliveries(tenant_id, status)
    }

    /// Dead-lettered deliveries
    pub fn dlq(&self, tenant_id: TenantId) -> Result<Vec<WebhookDelivery>> {
        self.deliveries(tenant_id, Some(DeliveryStatus::Dlq))
    }

    /// One delivery
    pub fn get_delivery(&self, tenant_id: TenantId, id: Uuid) -> Result<WebhookDelivery> {
        self.store
            .get_delivery(id)?
            .filter(|d| d.tenant_id == tenant_id)
            .ok_or(WebhookError::DeliveryNotFound(id))
    }

    /// New pending deliveries copying finished ones; the originals are kept
    pub fn replay(&self, tenant_id: TenantId, delivery_ids: &[Uuid]) -> Result<Vec<WebhookDelivery>> {
        if delivery_ids.is_empty() {
            return Err(WebhookError::Validation("delivery_ids must not be empty".to_string()));
        }

        let originals = delivery_ids
            .iter()
            .map(|id| self.get_delivery(tenant_id, *id))
            .collect::<Result<Vec<_>>>()?;
        for original in &originals {
            if matches!(original.status, DeliveryStatus::Pending | DeliveryStatus::Processing) {
                return Err(WebhookError::InvalidState {
                    id: original.id,
                    status: original.status,
                    action: "replay",
                });
            }
        }

        let now = Utc::now();
        let mut replays = Vec::with_capacity(originals.len());
        for original in originals {
            let mut replay = WebhookDelivery::new(
                tenant_id,
                original.endpoint_id,
                original.event_type,
                original.event_id,
                original.payload,
                now,
            );
            replay.replay_of = Some(original.id);
            self.store.insert_delivery(replay.clone())?;
            info!(delivery_id = %replay.id, replay_of = %original.id, "Webhook delivery replayed");
            replays.push(replay);
        }
        Ok(replays)
    }

    /// Make a failed or dead-lettered delivery due now
    pub fn retry(&self, tenant_id: TenantId, id: Uuid) -> Result<WebhookDelivery> {
        let delivery = self.store.reschedule(tenant_id, id, Utc::now())?;

        info!(delivery_id = %id, "Webhook delivery scheduled for retry");
        Ok(delivery)
    }

    /// Send a `webhook.test` event to one endpoint and wait for the result
    pub async fn test_endpoint(&self, tenant_id: TenantId, id: Uuid) -> Result<WebhookDelivery> {
        let endpoint = self.get_endpoint(tenant_id, id)?;
        let now = Utc::now();

        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            event_type: EventType::WebhookTest,
            tenant_id,
            created_at: now,
            data: serde_json::json!({
                "endpoint_id": endpoint.id,
                "message": "Test delivery",
            }),
        };
        let mut delivery = WebhookDelivery::new(
            tenant_id,
            endpoint.id,
            EventType::WebhookTest,
            envelope.id,
            serde_json::to_value(&envelope)?,
            now,
        );
        delivery.status = DeliveryStatus::Processing;
        self.store.insert_delivery(delivery.clone())?;

        self.worker.deliver(delivery, now).await
    }
}

impl std::fmt::Debug for WebhookService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookService")
            .field("config", &self.config)
            .finish()
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url).map_err(|e| WebhookError::Validation(format!("Invalid URL {}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(WebhookError::Validation(format!("Unsupported URL scheme: {}", scheme))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryWebhookStore;
    use crate::transport::MemoryTransport;

    fn service(status: u16) -> (WebhookService, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::with_status(status));
        let service = WebhookService::new(
            Arc::new(MemoryWebhookStore::new()),
            transport.clone(),
            WebhookConfig::default(),
        );
        (service, transport)
    }

    fn new_endpoint(event_types: Vec<EventType>) -> NewEndpoint {
        NewEndpoint {
            url: "https://receiver.example/hooks".to_string(),
            description: Some("primary".to_string()),
            event_types,
        }
    }

    #[test]
    fn test_create_endpoint_validates_url() {
        let (svc, _) = service(200);
        let tenant = Uuid::new_v4();

        let endpoint = svc.create_endpoint(tenant, new_endpoint(vec![])).unwrap();
        assert!(endpoint.secret.starts_with("whsec_"));
        assert!(endpoint.active);

        let bad = NewEndpoint {
            url: "ftp://receiver.example".to_string(),
            ..NewEndpoint::default()
        };
        assert!(matches!(svc.create_endpoint(tenant, bad), Err(WebhookError::Validation(_))));
        assert!(matches!(
            svc.create_endpoint(tenant, NewEndpoint::default()),
            Err(WebhookError::Validation(_))
        ));
    }

    #[test]
    fn test_other_tenant_sees_not_found() {
        let (svc, _) = service(200);
        let endpoint = svc.create_endpoint(Uuid::new_v4(), new_endpoint(vec![])).unwrap();

        let other = Uuid::new_v4();
        assert!(matches!(
            svc.get_endpoint(other, endpoint.id),
            Err(WebhookError::EndpointNotFound(_))
        ));
        assert!(svc.delete_endpoint(other, endpoint.id).is_err());
        assert!(svc.list_endpoints(other).unwrap().is_empty());
    }

    #[test]
    fn test_rotation_keeps_previous_secret_for_grace_period() {
        let (svc, _) = service(200);
        let tenant = Uuid::new_v4();
        let endpoint = svc.create_endpoint(tenant, new_endpoint(vec![])).unwrap();

        let rotated = svc
            .update_endpoint(
                tenant,
                endpoint.id,
                EndpointUpdate {
                    rotate_secret: true,
                    ..EndpointUpdate::default()
                },
            )
            .unwrap();

        assert_ne!(rotated.secret, endpoint.secret);
        let previous = rotated.previous_secret.clone().unwrap();
        assert_eq!(previous.secret, endpoint.secret);
        assert!(previous.retires_at > Utc::now() + Duration::hours(23));
        assert_eq!(rotated.live_secrets(Utc::now()).len(), 2);
    }

    #[test]
    fn test_emit_fans_out_to_subscribed_active_endpoints() {
        let (svc, _) = service(200);
        let tenant = Uuid::new_v4();
        svc.create_endpoint(tenant, new_endpoint(vec![])).unwrap();
        svc.create_endpoint(tenant, new_endpoint(vec![EventType::TransferFailed]))
            .unwrap();
        let disabled = svc.create_endpoint(tenant, new_endpoint(vec![])).unwrap();
        svc.update_endpoint(
            tenant,
            disabled.id,
            EndpointUpdate {
                active: Some(false),
                ..EndpointUpdate::default()
            },
        )
        .unwrap();

        let deliveries = svc
            .emit(tenant, EventType::TransferCompleted, serde_json::json!({"amount": "10.00"}))
            .unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].payload["type"], "transfer.completed");
        assert_eq!(deliveries[0].payload["data"]["amount"], "10.00");
        assert_eq!(svc.stats(tenant).unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_dlq_replay_creates_new_pending_delivery() {
        let (svc, _) = service(500);
        let tenant = Uuid::new_v4();
        svc.create_endpoint(tenant, new_endpoint(vec![])).unwrap();
        let original = svc
            .emit(tenant, EventType::SettlementFailed, serde_json::json!({}))
            .unwrap()
            .remove(0);

        let worker = svc.worker();
        let mut now = Utc::now();
        for _ in 0..5 {
            worker.run_cycle(now).await.unwrap();
            now = now + Duration::hours(2);
        }
        let dlq = svc.dlq(tenant).unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].id, original.id);

        let replays = svc.replay(tenant, &[original.id]).unwrap();
        assert_eq!(replays.len(), 1);
        assert_eq!(replays[0].status, DeliveryStatus::Pending);
        assert_eq!(replays[0].replay_of, Some(original.id));
        assert_eq!(replays[0].event_id, original.event_id);
        assert_eq!(svc.get_delivery(tenant, original.id).unwrap().status, DeliveryStatus::Dlq);

        // A pending delivery cannot be replayed
        assert!(matches!(
            svc.replay(tenant, &[replays[0].id]),
            Err(WebhookError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_resets_dlq_attempts() {
        let (svc, _) = service(500);
        let tenant = Uuid::new_v4();
        svc.create_endpoint(tenant, new_endpoint(vec![])).unwrap();
        let delivery = svc
            .emit(tenant, EventType::TransferFailed, serde_json::json!({}))
            .unwrap()
            .remove(0);

        // Pending deliveries are not retryable
        assert!(svc.retry(tenant, delivery.id).is_err());

        let worker = svc.worker();
        let mut now = Utc::now();
        for _ in 0..5 {
            worker.run_cycle(now).await.unwrap();
            now = now + Duration::hours(2);
        }

        let retried = svc.retry(tenant, delivery.id).unwrap();
        assert_eq!(retried.status, DeliveryStatus::Pending);
        assert_eq!(retried.attempts, 0);
        assert_eq!(svc.stats(tenant).unwrap().dlq, 0);

        // Another tenant cannot reschedule it
        assert!(matches!(
            svc.retry(Uuid::new_v4(), delivery.id),
            Err(WebhookError::DeliveryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_leaves_claimed_delivery_alone() {
        let store = Arc::new(MemoryWebhookStore::new());
        let svc = WebhookService::new(
            store.clone(),
            Arc::new(MemoryTransport::with_status(503)),
            WebhookConfig::default(),
        );
        let tenant = Uuid::new_v4();
        svc.create_endpoint(tenant, new_endpoint(vec![])).unwrap();
        let delivery = svc
            .emit(tenant, EventType::TransferCompleted, serde_json::json!({}))
            .unwrap()
            .remove(0);

        let now = Utc::now();
        svc.worker().run_cycle(now).await.unwrap();
        assert_eq!(svc.get_delivery(tenant, delivery.id).unwrap().status, DeliveryStatus::Failed);

        // A worker claims the failed delivery before the retry lands
        let claimed = store.claim_due(now + Duration::hours(1), 10).unwrap();
        assert_eq!(claimed.len(), 1);

        assert!(matches!(
            svc.retry(tenant, delivery.id),
            Err(WebhookError::InvalidState {
                status: DeliveryStatus::Processing,
                ..
            })
        ));
        let stored = svc.get_delivery(tenant, delivery.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Processing);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_endpoint_test_delivers_synchronously() {
        let (svc, transport) = service(200);
        let tenant = Uuid::new_v4();
        let endpoint = svc
            .create_endpoint(tenant, new_endpoint(vec![EventType::TransferCompleted]))
            .unwrap();

        let delivery = svc.test_endpoint(tenant, endpoint.id).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
        assert_eq!(delivery.event_type, EventType::WebhookTest);
        assert_eq!(transport.sent().len(), 1);
    }
}
