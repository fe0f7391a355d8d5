//! Error types for the ledger

use crate::types::{AccountId, TransferId, TransferStatus};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Bad input (non-positive amount, same account, currency mismatch)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Source account cannot cover the movement
    #[error("Insufficient balance in account {account_id}: required {required}, available {available}")]
    InsufficientBalance {
        /// Source account
        account_id: AccountId,
        /// Amount requested
        required: Decimal,
        /// Amount available
        available: Decimal,
    },

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transfer not found
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    /// Transfer status change not allowed by the state machine
    #[error("Invalid transfer transition for {transfer_id}: {from} -> {to}")]
    InvalidTransition {
        /// Transfer
        transfer_id: TransferId,
        /// Current status
        from: TransferStatus,
        /// Requested status
        to: TransferStatus,
    },

    /// Storage failure (transient, retry the whole operation)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Account locks could not be acquired in time
    #[error("Timed out acquiring account locks after {0} ms")]
    LockTimeout(u64),

    /// Invariant violation (money conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::LockTimeout(_))
    }

    /// Missing amount for insufficient balance errors
    pub fn shortfall(&self) -> Option<Decimal> {
        match self {
            Error::InsufficientBalance {
                required, available, ..
            } => Some(*required - *available),
            _ => None,
        }
    }
}
