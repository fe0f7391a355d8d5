//! Endpoint and delivery storage
//!
//! Deliveries are claimed with an atomic `pending|failed -> processing`
//! transition so two workers never send the same attempt.

use crate::error::{Result, WebhookError};
use crate::types::{DeliveryStats, DeliveryStatus, TenantId, WebhookDelivery, WebhookEndpoint};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Storage for webhook state
pub trait WebhookStore: Send + Sync {
    /// Add an endpoint
    fn insert_endpoint(&self, endpoint: WebhookEndpoint) -> Result<()>;

    /// Get an endpoint
    fn get_endpoint(&self, id: Uuid) -> Result<Option<WebhookEndpoint>>;

    /// Replace an endpoint
    fn update_endpoint(&self, endpoint: WebhookEndpoint) -> Result<()>;

    /// Delete an endpoint; returns whether it existed
    fn delete_endpoint(&self, id: Uuid) -> Result<bool>;

    /// Endpoints of a tenant, oldest first
    fn list_endpoints(&self, tenant_id: TenantId) -> Result<Vec<WebhookEndpoint>>;

    /// Add a delivery
    fn insert_delivery(&self, delivery: WebhookDelivery) -> Result<()>;

    /// Get a delivery
    fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>>;

    /// Replace a delivery
    fn update_delivery(&self, delivery: WebhookDelivery) -> Result<()>;

    /// Deliveries of a tenant, newest first, optionally filtered by status
    fn list_deliveries(&self, tenant_id: TenantId, status: Option<DeliveryStatus>) -> Result<Vec<WebhookDelivery>>;

    /// Atomically claim up to `limit` due deliveries, oldest due first
    fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WebhookDelivery>>;

    /// Make a tenant's `failed` or `dlq` delivery due at `now`
    ///
    /// Status check and write happen in one step, so a delivery claimed in
    /// the meantime is left alone. Dead-lettered deliveries start over with
    /// zero attempts.
    fn reschedule(&self, tenant_id: TenantId, id: Uuid, now: DateTime<Utc>) -> Result<WebhookDelivery>;

    /// Counts per status for a tenant
    fn stats(&self, tenant_id: TenantId) -> Result<DeliveryStats>;

    /// Delete DLQ deliveries last updated before `before`
    fn purge_dlq(&self, before: DateTime<Utc>) -> Result<usize>;
}

#[derive(Default)]
struct Tables {
    endpoints: HashMap<Uuid, WebhookEndpoint>,
    deliveries: HashMap<Uuid, WebhookDelivery>,
}

/// In-memory webhook store
#[derive(Default)]
pub struct MemoryWebhookStore {
    tables: RwLock<Tables>,
}

impl MemoryWebhookStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryWebhookStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryWebhookStore")
            .field("endpoints", &tables.endpoints.len())
            .field("deliveries", &tables.deliveries.len())
            .finish()
    }
}

impl WebhookStore for MemoryWebhookStore {
    fn insert_endpoint(&self, endpoint: WebhookEndpoint) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.endpoints.contains_key(&endpoint.id) {
            return Err(WebhookError::Storage(format!("Endpoint {} already exists", endpoint.id)));
        }
        tables.endpoints.insert(endpoint.id, endpoint);
        Ok(())
    }

    fn get_endpoint(&self, id: Uuid) -> Result<Option<WebhookEndpoint>> {
        Ok(self.tables.read().endpoints.get(&id).cloned())
    }

    fn update_endpoint(&self, endpoint: WebhookEndpoint) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.endpoints.get_mut(&endpoint.id) {
            Some(existing) => {
                *existing = endpoint;
                Ok(())
            }
            None => Err(WebhookError::EndpointNotFound(endpoint.id)),
        }
    }

    fn delete_endpoint(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().endpoints.remove(&id).is_some())
    }

    fn list_endpoints(&self, tenant_id: TenantId) -> Result<Vec<WebhookEndpoint>> {
        let mut endpoints: Vec<WebhookEndpoint> = self
            .tables
            .read()
            .endpoints
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(endpoints)
    }

    fn insert_delivery(&self, delivery: WebhookDelivery) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.deliveries.contains_key(&delivery.id) {
            return Err(WebhookError::Storage(format!("Delivery {} already exists", delivery.id)));
        }
        tables.deliveries.insert(delivery.id, delivery);
        Ok(())
    }

    fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>> {
        Ok(self.tables.read().deliveries.get(&id).cloned())
    }

    fn update_delivery(&self, delivery: WebhookDelivery) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.deliveries.get_mut(&delivery.id) {
            Some(existing) => {
                *existing = delivery;
                Ok(())
            }
            None => Err(WebhookError::DeliveryNotFound(delivery.id)),
        }
    }

    fn list_deliveries(&self, tenant_id: TenantId, status: Option<DeliveryStatus>) -> Result<Vec<WebhookDelivery>> {
        let mut deliveries: Vec<WebhookDelivery> = self
            .tables
            .read()
            .deliveries
            .values()
            .filter(|d| d.tenant_id == tenant_id && status.map(|s| d.status == s).unwrap_or(true))
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deliveries)
    }

    fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WebhookDelivery>> {
        let mut tables = self.tables.write();

        let mut due: Vec<(Option<DateTime<Utc>>, DateTime<Utc>, Uuid)> = tables
            .deliveries
            .values()
            .filter(|d| d.is_due(now))
            .map(|d| (d.next_retry_at, d.created_at, d.id))
            .collect();
        due.sort();

        let mut claimed = Vec::with_capacity(due.len().min(limit));
        for (_, _, id) in due.into_iter().take(limit) {
            if let Some(delivery) = tables.deliveries.get_mut(&id) {
                delivery.status = DeliveryStatus::Processing;
                delivery.updated_at = now;
                claimed.push(delivery.clone());
            }
        }
        Ok(claimed)
    }

    fn reschedule(&self, tenant_id: TenantId, id: Uuid, now: DateTime<Utc>) -> Result<WebhookDelivery> {
        let mut tables = self.tables.write();
        let delivery = tables
            .deliveries
            .get_mut(&id)
            .filter(|d| d.tenant_id == tenant_id)
            .ok_or(WebhookError::DeliveryNotFound(id))?;

        match delivery.status {
            DeliveryStatus::Failed => {}
            DeliveryStatus::Dlq => delivery.attempts = 0,
            status => {
                return Err(WebhookError::InvalidState {
                    id,
                    status,
                    action: "retry",
                })
            }
        }

        delivery.status = DeliveryStatus::Pending;
        delivery.next_retry_at = Some(now);
        delivery.updated_at = now;
        Ok(delivery.clone())
    }

    fn stats(&self, tenant_id: TenantId) -> Result<DeliveryStats> {
        let mut stats = DeliveryStats::default();
        for delivery in self.tables.read().deliveries.values() {
            if delivery.tenant_id == tenant_id {
                stats.add(delivery.status);
            }
        }
        Ok(stats)
    }

    fn purge_dlq(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.write();
        let before_len = tables.deliveries.len();
        tables
            .deliveries
            .retain(|_, d| !(d.status == DeliveryStatus::Dlq && d.updated_at < before));
        Ok(before_len - tables.deliveries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;
    use chrono::Duration;

    fn delivery(tenant_id: TenantId, now: DateTime<Utc>) -> WebhookDelivery {
        WebhookDelivery::new(
            tenant_id,
            Uuid::new_v4(),
            EventType::TransferCompleted,
            Uuid::new_v4(),
            serde_json::json!({"ok": true}),
            now,
        )
    }

    #[test]
    fn test_claim_is_exclusive() {
        let store = MemoryWebhookStore::new();
        let tenant = Uuid::new_v4();
        let now = Utc::now();
        for _ in 0..3 {
            store.insert_delivery(delivery(tenant, now)).unwrap();
        }

        let first = store.claim_due(now, 2).unwrap();
        let second = store.claim_due(now, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(store.claim_due(now, 2).unwrap().is_empty());
        assert_eq!(store.stats(tenant).unwrap().processing, 3);
    }

    #[test]
    fn test_dlq_not_claimed_and_purged_after_retention() {
        let store = MemoryWebhookStore::new();
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        let mut old = delivery(tenant, now - Duration::days(10));
        old.status = DeliveryStatus::Dlq;
        let mut recent = delivery(tenant, now);
        recent.status = DeliveryStatus::Dlq;
        store.insert_delivery(old.clone()).unwrap();
        store.insert_delivery(recent.clone()).unwrap();

        assert!(store.claim_due(now, 10).unwrap().is_empty());
        assert_eq!(store.purge_dlq(now - Duration::days(7)).unwrap(), 1);
        assert!(store.get_delivery(old.id).unwrap().is_none());
        assert!(store.get_delivery(recent.id).unwrap().is_some());
    }

    #[test]
    fn test_list_filters_by_tenant_and_status() {
        let store = MemoryWebhookStore::new();
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now();

        let mut delivered = delivery(tenant, now);
        delivered.status = DeliveryStatus::Delivered;
        store.insert_delivery(delivered).unwrap();
        store.insert_delivery(delivery(tenant, now)).unwrap();
        store.insert_delivery(delivery(other, now)).unwrap();

        assert_eq!(store.list_deliveries(tenant, None).unwrap().len(), 2);
        assert_eq!(
            store
                .list_deliveries(tenant, Some(DeliveryStatus::Delivered))
                .unwrap()
                .len(),
            1
        );
        let stats = store.stats(tenant).unwrap();
        assert_eq!((stats.pending, stats.delivered, stats.total), (1, 1, 2));
    }
}
