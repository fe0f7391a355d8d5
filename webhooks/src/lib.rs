//! Webhook delivery
//!
//! At-least-once notification of transfer and settlement lifecycle events
//! to tenant-registered endpoints.
//!
//! - Payloads are signed with HMAC-SHA256 per endpoint secret
//! - Failed deliveries back off exponentially (capped) and are requeued
//! - After `max_attempts` a delivery is parked in the dead-letter queue
//!   until an operator replays or retries it
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webhooks::{EventType, HttpTransport, MemoryWebhookStore, NewEndpoint, WebhookConfig, WebhookService};
//!
//! # fn main() -> webhooks::Result<()> {
//! let config = WebhookConfig::default();
//! let transport = HttpTransport::new(std::time::Duration::from_secs(10), &config.user_agent)?;
//! let service = WebhookService::new(Arc::new(MemoryWebhookStore::new()), Arc::new(transport), config);
//!
//! let tenant = uuid::Uuid::new_v4();
//! service.create_endpoint(tenant, NewEndpoint {
//!     url: "https://example.com/hooks".into(),
//!     ..Default::default()
//! })?;
//! service.emit(tenant, EventType::TransferCompleted, serde_json::json!({"transfer_id": "..."}))?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod signing;
pub mod store;
pub mod transport;
pub mod types;
pub mod worker;

pub use config::WebhookConfig;
pub use error::{Result, WebhookError};
pub use service::WebhookService;
pub use store::{MemoryWebhookStore, WebhookStore};
pub use transport::{HttpTransport, MemoryTransport, OutboundRequest, TransportResponse, WebhookTransport};
pub use types::*;
pub use worker::{DeliveryWorker, WorkerStats};
