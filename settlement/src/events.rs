//! Lifecycle events emitted when transfers and settlements finish
//!
//! The router and scheduler only know the [`EventSink`] seam; the gateway
//! plugs in a sink that turns events into webhook deliveries.

use crate::types::Rail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{Currency, TenantId, TransferId};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementEventKind {
    /// Transfer reached `completed`
    #[serde(rename = "transfer.completed")]
    TransferCompleted,
    /// Transfer reached `failed`
    #[serde(rename = "transfer.failed")]
    TransferFailed,
    /// Rail accepted the payment
    #[serde(rename = "settlement.completed")]
    SettlementCompleted,
    /// Rail rejected the payment
    #[serde(rename = "settlement.failed")]
    SettlementFailed,
}

impl SettlementEventKind {
    /// Event type string as seen by webhook receivers
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementEventKind::TransferCompleted => "transfer.completed",
            SettlementEventKind::TransferFailed => "transfer.failed",
            SettlementEventKind::SettlementCompleted => "settlement.completed",
            SettlementEventKind::SettlementFailed => "settlement.failed",
        }
    }
}

/// Lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    /// Event ID
    pub id: Uuid,
    /// Kind
    pub kind: SettlementEventKind,
    /// Tenant
    pub tenant_id: TenantId,
    /// Transfer
    pub transfer_id: TransferId,
    /// Rail involved
    pub rail: Option<Rail>,
    /// Provider reference
    pub provider_reference: Option<String>,
    /// Failure message
    pub error: Option<String>,
    /// Amount
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Event time
    pub occurred_at: DateTime<Utc>,
}

impl SettlementEvent {
    /// New event stamped now
    pub fn new(
        kind: SettlementEventKind,
        tenant_id: TenantId,
        transfer_id: TransferId,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            tenant_id,
            transfer_id,
            rail: None,
            provider_reference: None,
            error: None,
            amount,
            currency,
            occurred_at: Utc::now(),
        }
    }

    /// Set the rail
    pub fn with_rail(mut self, rail: Rail) -> Self {
        self.rail = Some(rail);
        self
    }

    /// Set the provider reference
    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.provider_reference = reference;
        self
    }

    /// Set the failure message
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Consumer of lifecycle events
///
/// Emission is fire-and-forget from the caller's side: a sink that cannot
/// accept an event logs it, it never fails the settlement.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event
    async fn publish(&self, event: SettlementEvent);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, event: SettlementEvent) {
        tracing::debug!(kind = event.kind.as_str(), transfer_id = %event.transfer_id, "Event dropped");
    }
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<SettlementEvent>>,
}

impl MemoryEventSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far
    pub fn events(&self) -> Vec<SettlementEvent> {
        self.events.lock().clone()
    }

    /// Kinds received for a transfer, in order
    pub fn kinds_for(&self, transfer_id: TransferId) -> Vec<SettlementEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.transfer_id == transfer_id)
            .map(|e| e.kind)
            .collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: SettlementEvent) {
        self.events.lock().push(event);
    }
}
