//! Webhook endpoints, deliveries and event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::WebhookError;

/// Tenant identifier as carried on webhook records
pub type TenantId = Uuid;

/// Event types an endpoint can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Transfer completed
    #[serde(rename = "transfer.completed")]
    TransferCompleted,
    /// Transfer failed
    #[serde(rename = "transfer.failed")]
    TransferFailed,
    /// Rail accepted a settlement
    #[serde(rename = "settlement.completed")]
    SettlementCompleted,
    /// Rail rejected a settlement
    #[serde(rename = "settlement.failed")]
    SettlementFailed,
    /// Test event sent on demand
    #[serde(rename = "webhook.test")]
    WebhookTest,
}

impl EventType {
    /// Every event type
    pub const ALL: [EventType; 5] = [
        EventType::TransferCompleted,
        EventType::TransferFailed,
        EventType::SettlementCompleted,
        EventType::SettlementFailed,
        EventType::WebhookTest,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TransferCompleted => "transfer.completed",
            EventType::TransferFailed => "transfer.failed",
            EventType::SettlementCompleted => "settlement.completed",
            EventType::SettlementFailed => "settlement.failed",
            EventType::WebhookTest => "webhook.test",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = WebhookError;

    fn from_str(s: &str) -> crate::Result<Self> {
        EventType::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| WebhookError::Validation(format!("Unknown event type: {}", s)))
    }
}

/// Secret kept valid for a grace period after rotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetiringSecret {
    /// Previous secret
    pub secret: String,
    /// When it stops being used for signing
    pub retires_at: DateTime<Utc>,
}

/// Tenant-registered delivery target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Endpoint ID
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Target URL
    pub url: String,
    /// Free text
    pub description: Option<String>,
    /// Subscribed events (empty = all)
    pub event_types: Vec<EventType>,
    /// Current signing secret
    pub secret: String,
    /// Secret being retired after a rotation
    pub previous_secret: Option<RetiringSecret>,
    /// Disabled endpoints receive nothing
    pub active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Whether the endpoint wants `event`
    pub fn subscribes_to(&self, event: EventType) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event)
    }

    /// Secrets to sign with at `now`, current first
    pub fn live_secrets(&self, now: DateTime<Utc>) -> Vec<&str> {
        let mut secrets = vec![self.secret.as_str()];
        if let Some(previous) = &self.previous_secret {
            if previous.retires_at > now {
                secrets.push(previous.secret.as_str());
            }
        }
        secrets
    }
}

/// Input for registering an endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewEndpoint {
    /// Target URL (http or https)
    pub url: String,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
    /// Subscribed events (empty = all)
    #[serde(default)]
    pub event_types: Vec<EventType>,
}

/// Partial endpoint update
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EndpointUpdate {
    /// New URL
    #[serde(default)]
    pub url: Option<String>,
    /// New description
    #[serde(default)]
    pub description: Option<String>,
    /// New subscription list
    #[serde(default)]
    pub event_types: Option<Vec<EventType>>,
    /// Enable or disable
    #[serde(default)]
    pub active: Option<bool>,
    /// Issue a new secret, keeping the old one for the grace period
    #[serde(default)]
    pub rotate_secret: bool,
}

/// Delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its first attempt
    Pending,
    /// Claimed by a worker
    Processing,
    /// Receiver answered 2xx
    Delivered,
    /// Last attempt failed; retried at `next_retry_at`
    Failed,
    /// Attempts exhausted; manual action only
    Dlq,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Dlq => "dlq",
        };
        f.write_str(s)
    }
}

/// One event on its way to one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Delivery ID (sent as `X-Webhook-Id`)
    pub id: Uuid,
    /// Tenant
    pub tenant_id: TenantId,
    /// Target endpoint
    pub endpoint_id: Uuid,
    /// Event type
    pub event_type: EventType,
    /// Event ID, shared by every delivery of the same event
    pub event_id: Uuid,
    /// Body sent to the receiver
    pub payload: serde_json::Value,
    /// Status
    pub status: DeliveryStatus,
    /// Attempts made
    pub attempts: u32,
    /// When the next attempt is due
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Last HTTP status received
    pub last_response_code: Option<u16>,
    /// Last transport or HTTP error
    pub last_error: Option<String>,
    /// Original delivery when this is a replay
    pub replay_of: Option<Uuid>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update
    pub updated_at: DateTime<Utc>,
    /// Success time
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    /// New pending delivery due now
    pub fn new(
        tenant_id: TenantId,
        endpoint_id: Uuid,
        event_type: EventType,
        event_id: Uuid,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            endpoint_id,
            event_type,
            event_id,
            payload,
            status: DeliveryStatus::Pending,
            attempts: 0,
            next_retry_at: Some(now),
            last_response_code: None,
            last_error: None,
            replay_of: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        }
    }

    /// Whether a worker may claim it at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, DeliveryStatus::Pending | DeliveryStatus::Failed)
            && self.next_retry_at.map(|at| at <= now).unwrap_or(true)
    }
}

/// Body envelope posted to receivers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event ID
    pub id: Uuid,
    /// Event type
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Tenant
    pub tenant_id: TenantId,
    /// Event time
    pub created_at: DateTime<Utc>,
    /// Event-specific data
    pub data: serde_json::Value,
}

/// Delivery counts per status for a tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Pending
    pub pending: usize,
    /// Processing
    pub processing: usize,
    /// Delivered
    pub delivered: usize,
    /// Failed, awaiting retry
    pub failed: usize,
    /// Dead-lettered
    pub dlq: usize,
    /// All deliveries
    pub total: usize,
}

impl DeliveryStats {
    /// Count one delivery
    pub fn add(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Pending => self.pending += 1,
            DeliveryStatus::Processing => self.processing += 1,
            DeliveryStatus::Delivered => self.delivered += 1,
            DeliveryStatus::Failed => self.failed += 1,
            DeliveryStatus::Dlq => self.dlq += 1,
        }
        self.total += 1;
    }
}
