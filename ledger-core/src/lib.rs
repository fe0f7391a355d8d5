//! Ledger Core
//!
//! Double-entry account ledger for the settlement platform.
//!
//! # Architecture
//!
//! - **Single mutator**: only [`Ledger`] changes balances
//! - **Atomic batches**: accounts, entries and transfer rows commit together
//! - **Ordered locking**: account locks are taken in ascending id order
//! - **Append-only entries**: corrections are new entries, never edits
//!
//! # Invariants
//!
//! - Money conservation: Σ(debits) == Σ(credits) for every reference
//! - `balance_total == balance_available + balance_in_streams` for every account
//! - Entries explain balances: Σ(credits) − Σ(debits) == `balance_total`
//! - Transfers are never deleted

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use storage::{LedgerStore, MemoryStore, WriteBatch};
pub use types::{
    Account, AccountId, AccountKind, Currency, EntryType, LedgerEntry, NewTransfer, TenantId,
    Transfer, TransferId, TransferOutcome, TransferRequest, TransferStatus, TransferType,
    TransferUpdate,
};
