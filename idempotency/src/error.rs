//! Error types for idempotency

use thiserror::Error;

/// Result type for idempotency operations
pub type Result<T> = std::result::Result<T, IdempotencyError>;

/// Idempotency errors
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Durable store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
