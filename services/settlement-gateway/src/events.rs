//! Turns settlement lifecycle events into webhook deliveries

use async_trait::async_trait;
use settlement::{EventSink, SettlementEvent};
use std::sync::Arc;
use tracing::warn;
use webhooks::{EventType, WebhookService};

pub struct WebhookEventSink {
    webhooks: Arc<WebhookService>,
}

impl WebhookEventSink {
    pub fn new(webhooks: Arc<WebhookService>) -> Self {
        Self { webhooks }
    }
}

#[async_trait]
impl EventSink for WebhookEventSink {
    async fn publish(&self, event: SettlementEvent) {
        let event_type: EventType = match event.kind.as_str().parse() {
            Ok(event_type) => event_type,
            Err(e) => {
                warn!(kind = event.kind.as_str(), "Event has no webhook type: {}", e);
                return;
            }
        };

        let tenant_id = *event.tenant_id.as_uuid();
        let data = match serde_json::to_value(&event) {
            Ok(data) => data,
            Err(e) => {
                warn!(transfer_id = %event.transfer_id, "Failed to serialize event: {}", e);
                return;
            }
        };

        // Delivery is the worker's job; emission only queues
        if let Err(e) = self.webhooks.emit(tenant_id, event_type, data) {
            warn!(
                transfer_id = %event.transfer_id,
                event_type = %event_type,
                "Failed to queue webhook deliveries: {}",
                e
            );
        }
    }
}
