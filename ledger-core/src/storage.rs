//! Storage layer for accounts, ledger entries and transfers
//!
//! # Tables
//!
//! - `accounts` - Current balances (key: account_id)
//! - `ledger_entries` - Append-only entry log (indexed by account and reference)
//! - `transfers` - Transfer records (key: transfer_id, never deleted)
//!
//! All mutations go through [`WriteBatch`], which a store must apply
//! atomically: either every row in the batch becomes visible or none does.

use crate::{
    error::{Error, Result},
    types::{Account, AccountId, AccountKind, Currency, LedgerEntry, TenantId, Transfer, TransferId},
};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Set of writes applied as one unit of work
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    /// Account rows to upsert
    pub accounts: Vec<Account>,
    /// Entries to append
    pub entries: Vec<LedgerEntry>,
    /// Transfer rows to upsert
    pub transfers: Vec<Transfer>,
}

impl WriteBatch {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an account row
    pub fn put_account(&mut self, account: Account) -> &mut Self {
        self.accounts.push(account);
        self
    }

    /// Append an entry
    pub fn append_entry(&mut self, entry: LedgerEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Upsert a transfer row
    pub fn put_transfer(&mut self, transfer: Transfer) -> &mut Self {
        self.transfers.push(transfer);
        self
    }

    /// Number of rows in the batch
    pub fn len(&self) -> usize {
        self.accounts.len() + self.entries.len() + self.transfers.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persistence backend for the ledger
///
/// Only [`crate::Ledger`] writes through this trait; readers may call the
/// getters directly.
pub trait LedgerStore: Send + Sync {
    /// Get account by ID
    fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    /// Find the clearing account for a tenant and currency
    fn find_clearing_account(&self, tenant_id: TenantId, currency: Currency)
        -> Result<Option<Account>>;

    /// Entries for an account, oldest first
    fn entries_for_account(&self, id: AccountId) -> Result<Vec<LedgerEntry>>;

    /// Entries for a reference, oldest first
    fn entries_for_reference(&self, reference_type: &str, reference_id: &str)
        -> Result<Vec<LedgerEntry>>;

    /// Get transfer by ID
    fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>>;

    /// Transfers for a tenant, newest first
    fn list_transfers(&self, tenant_id: TenantId) -> Result<Vec<Transfer>>;

    /// Every account (used for conservation checks)
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Apply a batch atomically
    fn write_batch(&self, batch: WriteBatch) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    entries: Vec<LedgerEntry>,
    entries_by_account: HashMap<AccountId, Vec<usize>>,
    entries_by_reference: HashMap<(String, String), Vec<usize>>,
    transfers: HashMap<TransferId, Transfer>,
}

/// In-process store
///
/// Batches are applied under a single write lock, so readers never observe
/// half of a batch.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.tables.read().accounts.get(&id).cloned())
    }

    fn find_clearing_account(
        &self,
        tenant_id: TenantId,
        currency: Currency,
    ) -> Result<Option<Account>> {
        let tables = self.tables.read();
        Ok(tables
            .accounts
            .values()
            .find(|a| {
                a.tenant_id == tenant_id && a.currency == currency && a.kind == AccountKind::Clearing
            })
            .cloned())
    }

    fn entries_for_account(&self, id: AccountId) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables.read();
        Ok(tables
            .entries_by_account
            .get(&id)
            .map(|idx| idx.iter().map(|i| tables.entries[*i].clone()).collect())
            .unwrap_or_default())
    }

    fn entries_for_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables.read();
        let key = (reference_type.to_string(), reference_id.to_string());
        Ok(tables
            .entries_by_reference
            .get(&key)
            .map(|idx| idx.iter().map(|i| tables.entries[*i].clone()).collect())
            .unwrap_or_default())
    }

    fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>> {
        Ok(self.tables.read().transfers.get(&id).cloned())
    }

    fn list_transfers(&self, tenant_id: TenantId) -> Result<Vec<Transfer>> {
        let tables = self.tables.read();
        let mut transfers: Vec<Transfer> = tables
            .transfers
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect();
        transfers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transfers)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.tables.read().accounts.values().cloned().collect())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        for account in &batch.accounts {
            if !account.is_consistent() {
                return Err(Error::InvariantViolation(format!(
                    "Account {} balances inconsistent",
                    account.id
                )));
            }
        }

        let mut tables = self.tables.write();

        for account in batch.accounts {
            tables.accounts.insert(account.id, account);
        }

        for entry in batch.entries {
            let index = tables.entries.len();
            tables
                .entries_by_account
                .entry(entry.account_id)
                .or_default()
                .push(index);
            tables
                .entries_by_reference
                .entry((entry.reference_type.clone(), entry.reference_id.clone()))
                .or_default()
                .push(index);
            tables.entries.push(entry);
        }

        for transfer in batch.transfers {
            tables.transfers.insert(transfer.id, transfer);
        }

        tracing::debug!("Write batch applied");
        Ok(())
    }
}
