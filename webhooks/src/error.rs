//! Error types for webhook management and delivery

use crate::types::DeliveryStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result type for webhook operations
pub type Result<T> = std::result::Result<T, WebhookError>;

/// Webhook errors
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Bad input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown endpoint (or owned by another tenant)
    #[error("Webhook endpoint not found: {0}")]
    EndpointNotFound(Uuid),

    /// Unknown delivery (or owned by another tenant)
    #[error("Webhook delivery not found: {0}")]
    DeliveryNotFound(Uuid),

    /// Operation not allowed in the delivery's current status
    #[error("Delivery {id} is {status}, cannot {action}")]
    InvalidState {
        /// Delivery
        id: Uuid,
        /// Current status
        status: DeliveryStatus,
        /// Attempted action
        action: &'static str,
    },

    /// Storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WebhookError {
    /// Whether retrying may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Storage(_))
    }
}
