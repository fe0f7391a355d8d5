//! Error types for settlement routing and scheduling

use crate::types::Rail;
use ledger_core::Currency;
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a rail adapter
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{rail} rail failure: {message}")]
pub struct RailError {
    /// Rail that failed
    pub rail: Rail,
    /// Provider message
    pub message: String,
    /// Whether the same request may succeed later
    pub retryable: bool,
}

impl RailError {
    /// Transient failure
    pub fn retryable(rail: Rail, message: impl Into<String>) -> Self {
        Self {
            rail,
            message: message.into(),
            retryable: true,
        }
    }

    /// Permanent failure
    pub fn terminal(rail: Rail, message: impl Into<String>) -> Self {
        Self {
            rail,
            message: message.into(),
            retryable: false,
        }
    }
}

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Bad input
    #[error("Validation error: {0}")]
    Validation(String),

    /// No rail accepts the transfer
    #[error("No rail available for {amount} {currency} (country: {country})")]
    NoRoute {
        /// Amount
        amount: Decimal,
        /// Currency the rail must deliver
        currency: Currency,
        /// Destination country or "any"
        country: String,
    },

    /// Rail failure
    #[error(transparent)]
    Rail(#[from] RailError),

    /// No adapter registered for the rail
    #[error("No adapter registered for rail {0}")]
    AdapterMissing(Rail),

    /// Queue item not found
    #[error("Queue item not found: {0}")]
    QueueItemNotFound(uuid::Uuid),

    /// Settlement store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ledger(e) => e.is_retryable(),
            Error::Rail(e) => e.retryable,
            Error::Store(_) => true,
            _ => false,
        }
    }
}
