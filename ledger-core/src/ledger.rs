//! Ledger engine
//!
//! The only component allowed to change account balances. Every movement
//! is applied as one [`WriteBatch`]: both account rows, the debit entry, the
//! credit entry and (when present) the transfer row commit together or not
//! at all.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{AccountKind, Config, Currency, Ledger, MemoryStore, TenantId, TransferRequest};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::new(Arc::new(MemoryStore::new()), Config::default());
//!     let tenant = TenantId::new();
//!     let a = ledger.open_account(tenant, Currency::USD, AccountKind::Customer, Decimal::new(500, 0)).await?;
//!     let b = ledger.open_account(tenant, Currency::USD, AccountKind::Customer, Decimal::ZERO).await?;
//!
//!     let outcome = ledger.transfer(TransferRequest {
//!         from_account_id: a.id,
//!         to_account_id: b.id,
//!         amount: Decimal::new(100, 0),
//!         reference_type: "payout".to_string(),
//!         reference_id: "p-1".to_string(),
//!         description: None,
//!     }).await?;
//!     assert_eq!(outcome.new_from_balance, Decimal::new(400, 0));
//!     Ok(())
//! }
//! ```

use crate::{
    config::Config,
    error::{Error, Result},
    metrics::{self, LEDGER_LOCK_TIMEOUTS, LEDGER_TRANSFER_DURATION},
    storage::{LedgerStore, WriteBatch},
    types::{
        Account, AccountId, AccountKind, Currency, EntryType, LedgerEntry, NewTransfer, TenantId,
        Transfer, TransferId, TransferOutcome, TransferRequest, TransferStatus, TransferType,
        TransferUpdate,
    },
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reference type for entries created by [`Ledger::execute_transfer`]
pub const REFERENCE_TRANSFER: &str = "transfer";
/// Reference type for compensating entries
pub const REFERENCE_REVERSAL: &str = "transfer_reversal";
/// Reference type for opening balance credits
pub const REFERENCE_OPENING_BALANCE: &str = "opening_balance";

struct Movement {
    amount: Decimal,
    reference_type: String,
    reference_id: String,
    description: Option<String>,
}

/// Double-entry ledger over a [`LedgerStore`]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    account_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    transfer_locks: DashMap<TransferId, Arc<Mutex<()>>>,
    clearing_lock: Mutex<()>,
    config: Config,
}

impl Ledger {
    /// Create a ledger over the given store
    pub fn new(store: Arc<dyn LedgerStore>, config: Config) -> Self {
        Self {
            store,
            account_locks: DashMap::new(),
            transfer_locks: DashMap::new(),
            clearing_lock: Mutex::new(()),
            config,
        }
    }

    /// Ledger configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open an account, recording any opening balance as a credit entry
    pub async fn open_account(
        &self,
        tenant_id: TenantId,
        currency: Currency,
        kind: AccountKind,
        opening_balance: Decimal,
    ) -> Result<Account> {
        if opening_balance < Decimal::ZERO {
            return Err(Error::Validation(
                "Opening balance cannot be negative".to_string(),
            ));
        }

        let mut account = Account::new(tenant_id, currency, kind);
        let mut batch = WriteBatch::new();

        if opening_balance > Decimal::ZERO {
            account.balance_total = opening_balance;
            account.balance_available = opening_balance;
            batch.append_entry(LedgerEntry {
                id: Uuid::now_v7(),
                account_id: account.id,
                entry_type: EntryType::Credit,
                amount: opening_balance,
                currency,
                balance_after: opening_balance,
                reference_type: REFERENCE_OPENING_BALANCE.to_string(),
                reference_id: account.id.to_string(),
                description: Some("Opening balance".to_string()),
                created_at: account.created_at,
            });
        }

        batch.put_account(account.clone());
        let result = self.store.write_batch(batch);
        metrics::record_movement("opening", &result);
        result?;

        info!(
            account_id = %account.id,
            tenant_id = %tenant_id,
            currency = %currency,
            "Account opened"
        );
        Ok(account)
    }

    /// Clearing account for a tenant and currency, created on first use
    pub async fn clearing_account(&self, tenant_id: TenantId, currency: Currency) -> Result<Account> {
        if let Some(account) = self.store.find_clearing_account(tenant_id, currency)? {
            return Ok(account);
        }

        let _guard = self.clearing_lock.lock().await;
        if let Some(account) = self.store.find_clearing_account(tenant_id, currency)? {
            return Ok(account);
        }

        let account = Account::new(tenant_id, currency, AccountKind::Clearing);
        let mut batch = WriteBatch::new();
        batch.put_account(account.clone());
        self.store.write_batch(batch)?;

        info!(account_id = %account.id, tenant_id = %tenant_id, currency = %currency, "Clearing account created");
        Ok(account)
    }

    /// Move `amount` between two accounts
    ///
    /// Both rows are locked in ascending id order, re-read, checked and
    /// written back with one debit and one credit entry in a single batch.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferOutcome> {
        let started = Instant::now();
        let result = self.transfer_inner(request).await;
        LEDGER_TRANSFER_DURATION.observe(started.elapsed().as_secs_f64());
        metrics::record_movement("transfer", &result);
        result
    }

    async fn transfer_inner(&self, request: TransferRequest) -> Result<TransferOutcome> {
        self.validate_amount(request.amount)?;
        if request.from_account_id == request.to_account_id {
            return Err(Error::Validation(
                "Source and destination accounts must differ".to_string(),
            ));
        }

        let _guards = self
            .lock_accounts(&[request.from_account_id, request.to_account_id])
            .await?;

        let mut from = self.load_account(request.from_account_id)?;
        let mut to = self.load_account(request.to_account_id)?;

        let mut batch = WriteBatch::new();
        let outcome = Self::apply_movement(
            &mut from,
            &mut to,
            Movement {
                amount: request.amount,
                reference_type: request.reference_type,
                reference_id: request.reference_id,
                description: request.description,
            },
            &mut batch,
        )?;

        self.store.write_batch(batch)?;

        debug!(
            from = %from.id,
            to = %to.id,
            amount = %request.amount,
            "Transfer applied"
        );
        Ok(outcome)
    }

    /// Create a transfer record and apply its balance movement atomically
    ///
    /// Internal transfers end `completed`. Cross-border transfers capture
    /// `amount + fee` into the tenant's clearing account and end
    /// `processing`, waiting for external settlement.
    pub async fn execute_transfer(&self, tenant_id: TenantId, new: NewTransfer) -> Result<Transfer> {
        let started = Instant::now();
        let result = self.execute_transfer_inner(tenant_id, new).await;
        LEDGER_TRANSFER_DURATION.observe(started.elapsed().as_secs_f64());
        metrics::record_movement("execute", &result);
        result
    }

    async fn execute_transfer_inner(&self, tenant_id: TenantId, new: NewTransfer) -> Result<Transfer> {
        self.validate_amount(new.amount)?;
        if new.fee_amount < Decimal::ZERO {
            return Err(Error::Validation("Fee cannot be negative".to_string()));
        }

        let source = self.account_for_tenant(tenant_id, new.from_account_id)?;

        let to_account_id = match new.transfer_type {
            TransferType::Internal => {
                if new.fee_amount != Decimal::ZERO {
                    return Err(Error::Validation(
                        "Fees apply to cross-border transfers only".to_string(),
                    ));
                }
                let to = new.to_account_id.ok_or_else(|| {
                    Error::Validation("to_account_id is required for internal transfers".to_string())
                })?;
                self.account_for_tenant(tenant_id, to)?;
                to
            }
            TransferType::CrossBorder => self.clearing_account(tenant_id, source.currency).await?.id,
        };

        if to_account_id == new.from_account_id {
            return Err(Error::Validation(
                "Source and destination accounts must differ".to_string(),
            ));
        }

        let transfer_id = TransferId::new();
        let total = new.amount + new.fee_amount;

        let _guards = self
            .lock_accounts(&[new.from_account_id, to_account_id])
            .await?;

        let mut from = self.load_account(new.from_account_id)?;
        let mut to = self.load_account(to_account_id)?;

        let mut batch = WriteBatch::new();
        Self::apply_movement(
            &mut from,
            &mut to,
            Movement {
                amount: total,
                reference_type: REFERENCE_TRANSFER.to_string(),
                reference_id: transfer_id.to_string(),
                description: new.description.clone(),
            },
            &mut batch,
        )?;

        let now = Utc::now();
        let (status, completed_at) = match new.transfer_type {
            TransferType::Internal => (TransferStatus::Completed, Some(now)),
            TransferType::CrossBorder => (TransferStatus::Processing, None),
        };

        let transfer = Transfer {
            id: transfer_id,
            tenant_id,
            transfer_type: new.transfer_type,
            status,
            from_account_id: from.id,
            to_account_id: to.id,
            amount: new.amount,
            currency: from.currency,
            destination_amount: new.destination_amount,
            destination_currency: new.destination_currency,
            fx_rate: new.fx_rate,
            fee_amount: new.fee_amount,
            idempotency_key: new.idempotency_key,
            rail: new.rail,
            provider_reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            completed_at,
        };
        batch.put_transfer(transfer.clone());

        self.store.write_batch(batch)?;

        info!(
            transfer_id = %transfer.id,
            tenant_id = %tenant_id,
            status = %transfer.status,
            amount = %transfer.amount,
            "Transfer executed"
        );
        Ok(transfer)
    }

    /// Undo the capture of a cross-border transfer and mark it failed
    ///
    /// The original entries stay; new entries move `amount + fee` from the
    /// clearing account back to the source account.
    pub async fn reverse_transfer(&self, transfer_id: TransferId, reason: &str) -> Result<Transfer> {
        let started = Instant::now();
        let result = self.reverse_transfer_inner(transfer_id, reason).await;
        LEDGER_TRANSFER_DURATION.observe(started.elapsed().as_secs_f64());
        metrics::record_movement("reversal", &result);
        result
    }

    async fn reverse_transfer_inner(&self, transfer_id: TransferId, reason: &str) -> Result<Transfer> {
        let _transfer_guard = self.lock_transfers(&[transfer_id]).await?;
        let mut transfer = self.load_transfer(transfer_id)?;

        if transfer.transfer_type != TransferType::CrossBorder {
            return Err(Error::Validation(
                "Only cross-border transfers can be reversed".to_string(),
            ));
        }
        if !transfer.status.can_transition_to(TransferStatus::Failed) {
            return Err(Error::InvalidTransition {
                transfer_id,
                from: transfer.status,
                to: TransferStatus::Failed,
            });
        }

        let _guards = self
            .lock_accounts(&[transfer.from_account_id, transfer.to_account_id])
            .await?;

        let mut clearing = self.load_account(transfer.to_account_id)?;
        let mut source = self.load_account(transfer.from_account_id)?;

        let mut batch = WriteBatch::new();
        Self::apply_movement(
            &mut clearing,
            &mut source,
            Movement {
                amount: transfer.total_debit(),
                reference_type: REFERENCE_REVERSAL.to_string(),
                reference_id: transfer_id.to_string(),
                description: Some(format!("Reversal: {}", reason)),
            },
            &mut batch,
        )?;

        transfer.status = TransferStatus::Failed;
        transfer.failure_reason = Some(reason.to_string());
        transfer.updated_at = Utc::now();
        batch.put_transfer(transfer.clone());

        self.store.write_batch(batch)?;

        warn!(transfer_id = %transfer_id, reason, "Transfer reversed");
        Ok(transfer)
    }

    /// Move a transfer to `next`, enforcing the status machine
    ///
    /// Cross-border transfers holding captured funds fail through
    /// [`Ledger::reverse_transfer`] instead.
    pub async fn update_transfer_status(
        &self,
        transfer_id: TransferId,
        next: TransferStatus,
        update: TransferUpdate,
    ) -> Result<Transfer> {
        let _guard = self.lock_transfers(&[transfer_id]).await?;
        let mut transfer = self.load_transfer(transfer_id)?;

        if !transfer.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                transfer_id,
                from: transfer.status,
                to: next,
            });
        }
        if next == TransferStatus::Failed
            && transfer.transfer_type == TransferType::CrossBorder
            && transfer.status != TransferStatus::Pending
        {
            return Err(Error::Validation(
                "Captured cross-border transfers fail through reversal".to_string(),
            ));
        }

        let now = Utc::now();
        let previous = transfer.status;
        transfer.status = next;
        transfer.updated_at = now;
        if next == TransferStatus::Completed {
            transfer.completed_at = Some(now);
        }
        if let Some(rail) = update.rail {
            transfer.rail = Some(rail);
        }
        if let Some(reference) = update.provider_reference {
            transfer.provider_reference = Some(reference);
        }
        if let Some(reason) = update.failure_reason {
            transfer.failure_reason = Some(reason);
        }

        let mut batch = WriteBatch::new();
        batch.put_transfer(transfer.clone());
        self.store.write_batch(batch)?;

        debug!(transfer_id = %transfer_id, from = %previous, to = %next, "Transfer status updated");
        Ok(transfer)
    }

    /// Claim a transfer for one settlement run
    ///
    /// Compare-and-set under the transfer lock: the transfer moves from
    /// `expected` to `settling` only if it is still in `expected`. Exactly
    /// one of any number of concurrent callers wins; the others get
    /// [`Error::InvalidTransition`] and must not touch the rail.
    pub async fn claim_for_settlement(&self, transfer_id: TransferId, expected: TransferStatus) -> Result<Transfer> {
        let _guard = self.lock_transfers(&[transfer_id]).await?;
        let mut transfer = self.load_transfer(transfer_id)?;

        if transfer.status != expected || !expected.can_transition_to(TransferStatus::Settling) {
            return Err(Error::InvalidTransition {
                transfer_id,
                from: transfer.status,
                to: TransferStatus::Settling,
            });
        }

        transfer.status = TransferStatus::Settling;
        transfer.updated_at = Utc::now();

        let mut batch = WriteBatch::new();
        batch.put_transfer(transfer.clone());
        self.store.write_batch(batch)?;

        debug!(transfer_id = %transfer_id, from = %expected, "Transfer claimed for settlement");
        Ok(transfer)
    }

    /// Get account by ID
    pub fn account(&self, id: AccountId) -> Result<Account> {
        self.load_account(id)
    }

    /// Entries for an account, oldest first
    pub fn entries_for_account(&self, id: AccountId) -> Result<Vec<LedgerEntry>> {
        self.store.entries_for_account(id)
    }

    /// Entries for a reference, oldest first
    pub fn entries_for_reference(&self, reference_type: &str, reference_id: &str) -> Result<Vec<LedgerEntry>> {
        self.store.entries_for_reference(reference_type, reference_id)
    }

    /// Get transfer by ID
    pub fn transfer_record(&self, id: TransferId) -> Result<Transfer> {
        self.load_transfer(id)
    }

    /// Transfers for a tenant, newest first
    pub fn transfers(&self, tenant_id: TenantId) -> Result<Vec<Transfer>> {
        self.store.list_transfers(tenant_id)
    }

    /// Sum of `balance_total` across all accounts in a currency
    pub fn total_balance(&self, currency: Currency) -> Result<Decimal> {
        Ok(self
            .store
            .list_accounts()?
            .iter()
            .filter(|a| a.currency == currency)
            .map(|a| a.balance_total)
            .sum())
    }

    /// Check that an account's entries explain its balance
    pub fn reconcile_account(&self, id: AccountId) -> Result<()> {
        let account = self.load_account(id)?;
        let net: Decimal = self
            .store
            .entries_for_account(id)?
            .iter()
            .map(|e| match e.entry_type {
                EntryType::Credit => e.amount,
                EntryType::Debit => -e.amount,
            })
            .sum();

        if net != account.balance_total {
            return Err(Error::InvariantViolation(format!(
                "Account {} balance {} does not match entries {}",
                id, account.balance_total, net
            )));
        }
        Ok(())
    }

    fn validate_amount(&self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation("Amount must be positive".to_string()));
        }
        if let Some(max) = self.config.max_transfer_amount {
            if amount > max {
                return Err(Error::Validation(format!(
                    "Amount {} exceeds maximum {}",
                    amount, max
                )));
            }
        }
        Ok(())
    }

    fn load_account(&self, id: AccountId) -> Result<Account> {
        self.store.get_account(id)?.ok_or(Error::AccountNotFound(id))
    }

    fn account_for_tenant(&self, tenant_id: TenantId, id: AccountId) -> Result<Account> {
        let account = self.load_account(id)?;
        if account.tenant_id != tenant_id {
            return Err(Error::AccountNotFound(id));
        }
        Ok(account)
    }

    fn load_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.store.get_transfer(id)?.ok_or(Error::TransferNotFound(id))
    }

    fn apply_movement(
        from: &mut Account,
        to: &mut Account,
        movement: Movement,
        batch: &mut WriteBatch,
    ) -> Result<TransferOutcome> {
        if from.currency != to.currency {
            return Err(Error::Validation(format!(
                "Currency mismatch: {} -> {}",
                from.currency, to.currency
            )));
        }
        if from.balance_available < movement.amount {
            return Err(Error::InsufficientBalance {
                account_id: from.id,
                required: movement.amount,
                available: from.balance_available,
            });
        }

        let now = Utc::now();
        from.balance_available -= movement.amount;
        from.balance_total -= movement.amount;
        from.updated_at = now;
        to.balance_available += movement.amount;
        to.balance_total += movement.amount;
        to.updated_at = now;

        let debit = LedgerEntry {
            id: Uuid::now_v7(),
            account_id: from.id,
            entry_type: EntryType::Debit,
            amount: movement.amount,
            currency: from.currency,
            balance_after: from.balance_available,
            reference_type: movement.reference_type.clone(),
            reference_id: movement.reference_id.clone(),
            description: movement.description.clone(),
            created_at: now,
        };
        let credit = LedgerEntry {
            id: Uuid::now_v7(),
            account_id: to.id,
            entry_type: EntryType::Credit,
            amount: movement.amount,
            currency: to.currency,
            balance_after: to.balance_available,
            reference_type: movement.reference_type,
            reference_id: movement.reference_id,
            description: movement.description,
            created_at: now,
        };

        let outcome = TransferOutcome {
            new_from_balance: from.balance_available,
            new_to_balance: to.balance_available,
            debit_entry_id: debit.id,
            credit_entry_id: credit.id,
        };

        batch
            .put_account(from.clone())
            .put_account(to.clone())
            .append_entry(debit)
            .append_entry(credit);

        Ok(outcome)
    }

    async fn lock_accounts(&self, ids: &[AccountId]) -> Result<Vec<OwnedMutexGuard<()>>> {
        self.acquire(&self.account_locks, ids).await
    }

    async fn lock_transfers(&self, ids: &[TransferId]) -> Result<Vec<OwnedMutexGuard<()>>> {
        self.acquire(&self.transfer_locks, ids).await
    }

    /// Lock keys in ascending order, bounded by the configured timeout
    async fn acquire<K>(
        &self,
        locks: &DashMap<K, Arc<Mutex<()>>>,
        keys: &[K],
    ) -> Result<Vec<OwnedMutexGuard<()>>>
    where
        K: Copy + Ord + Hash + Eq,
    {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();

        let mutexes: Vec<Arc<Mutex<()>>> = ordered
            .iter()
            .map(|key| locks.entry(*key).or_insert_with(|| Arc::new(Mutex::new(()))).clone())
            .collect();

        let acquire_all = async move {
            let mut guards = Vec::with_capacity(mutexes.len());
            for mutex in mutexes {
                guards.push(mutex.lock_owned().await);
            }
            guards
        };

        let timeout = Duration::from_millis(self.config.lock_timeout_ms);
        match tokio::time::timeout(timeout, acquire_all).await {
            Ok(guards) => Ok(guards),
            Err(_) => {
                LEDGER_LOCK_TIMEOUTS.inc();
                warn!(timeout_ms = self.config.lock_timeout_ms, "Lock acquisition timed out");
                Err(Error::LockTimeout(self.config.lock_timeout_ms))
            }
        }
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("config", &self.config)
            .field("locked_accounts", &self.account_locks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store that can be told to fail every write
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl LedgerStore for FlakyStore {
        fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
            self.inner.get_account(id)
        }
        fn find_clearing_account(&self, tenant_id: TenantId, currency: Currency) -> Result<Option<Account>> {
            self.inner.find_clearing_account(tenant_id, currency)
        }
        fn entries_for_account(&self, id: AccountId) -> Result<Vec<LedgerEntry>> {
            self.inner.entries_for_account(id)
        }
        fn entries_for_reference(&self, reference_type: &str, reference_id: &str) -> Result<Vec<LedgerEntry>> {
            self.inner.entries_for_reference(reference_type, reference_id)
        }
        fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>> {
            self.inner.get_transfer(id)
        }
        fn list_transfers(&self, tenant_id: TenantId) -> Result<Vec<Transfer>> {
            self.inner.list_transfers(tenant_id)
        }
        fn list_accounts(&self) -> Result<Vec<Account>> {
            self.inner.list_accounts()
        }
        fn write_batch(&self, batch: WriteBatch) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Storage("simulated commit failure".to_string()));
            }
            self.inner.write_batch(batch)
        }
    }

    fn create_test_ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()), Config::default())
    }

    async fn open(ledger: &Ledger, tenant: TenantId, balance: Decimal) -> Account {
        ledger
            .open_account(tenant, Currency::USD, AccountKind::Customer, balance)
            .await
            .unwrap()
    }

    fn request(from: AccountId, to: AccountId, amount: Decimal) -> TransferRequest {
        TransferRequest {
            from_account_id: from,
            to_account_id: to,
            amount,
            reference_type: "test".to_string(),
            reference_id: Uuid::now_v7().to_string(),
            description: None,
        }
    }

    fn internal(from: AccountId, to: AccountId, amount: Decimal) -> NewTransfer {
        NewTransfer {
            transfer_type: TransferType::Internal,
            from_account_id: from,
            to_account_id: Some(to),
            amount,
            fee_amount: Decimal::ZERO,
            destination_amount: None,
            destination_currency: None,
            fx_rate: None,
            rail: None,
            idempotency_key: None,
            description: Some("internal".to_string()),
        }
    }

    fn cross_border(from: AccountId, amount: Decimal, fee: Decimal) -> NewTransfer {
        NewTransfer {
            transfer_type: TransferType::CrossBorder,
            from_account_id: from,
            to_account_id: None,
            amount,
            fee_amount: fee,
            destination_amount: Some(amount * dec!(5)),
            destination_currency: Some(Currency::BRL),
            fx_rate: Some(dec!(5)),
            rail: Some("pix".to_string()),
            idempotency_key: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_internal_transfer_example() {
        let ledger = create_test_ledger();
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(500)).await;
        let b = open(&ledger, tenant, dec!(200)).await;

        let transfer = ledger
            .execute_transfer(tenant, internal(a.id, b.id, dec!(100)))
            .await
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::Completed);
        assert!(transfer.completed_at.is_some());
        assert_eq!(ledger.account(a.id).unwrap().balance_available, dec!(400));
        assert_eq!(ledger.account(b.id).unwrap().balance_available, dec!(300));

        let entries = ledger
            .entries_for_reference(REFERENCE_TRANSFER, &transfer.id.to_string())
            .unwrap();
        assert_eq!(entries.len(), 2);
        let debit = entries.iter().find(|e| e.entry_type == EntryType::Debit).unwrap();
        let credit = entries.iter().find(|e| e.entry_type == EntryType::Credit).unwrap();
        assert_eq!(debit.balance_after, dec!(400));
        assert_eq!(credit.balance_after, dec!(300));
        assert_eq!(debit.amount, credit.amount);
    }

    #[tokio::test]
    async fn test_transfer_returns_new_balances() {
        let ledger = create_test_ledger();
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(500)).await;
        let b = open(&ledger, tenant, dec!(200)).await;

        let outcome = ledger.transfer(request(a.id, b.id, dec!(100))).await.unwrap();
        assert_eq!(outcome.new_from_balance, dec!(400));
        assert_eq!(outcome.new_to_balance, dec!(300));
        ledger.reconcile_account(a.id).unwrap();
        ledger.reconcile_account(b.id).unwrap();
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let ledger = create_test_ledger();
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(50)).await;
        let b = open(&ledger, tenant, dec!(0)).await;

        let err = ledger.transfer(request(a.id, b.id, dec!(80))).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert_eq!(err.shortfall(), Some(dec!(30)));
        assert!(!err.is_retryable());
        assert_eq!(ledger.account(a.id).unwrap().balance_available, dec!(50));
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let ledger = create_test_ledger();
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(100)).await;
        let b = open(&ledger, tenant, dec!(100)).await;
        let eur = ledger
            .open_account(tenant, Currency::EUR, AccountKind::Customer, dec!(100))
            .await
            .unwrap();

        let same = ledger.transfer(request(a.id, a.id, dec!(1))).await.unwrap_err();
        assert!(matches!(same, Error::Validation(_)));

        let zero = ledger.transfer(request(a.id, b.id, dec!(0))).await.unwrap_err();
        assert!(matches!(zero, Error::Validation(_)));

        let mismatch = ledger.transfer(request(a.id, eur.id, dec!(1))).await.unwrap_err();
        assert!(matches!(mismatch, Error::Validation(_)));

        let missing = ledger
            .transfer(request(a.id, AccountId::new(), dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_other_tenant_account_not_found() {
        let ledger = create_test_ledger();
        let a = open(&ledger, TenantId::new(), dec!(100)).await;
        let b = open(&ledger, TenantId::new(), dec!(100)).await;

        let err = ledger
            .execute_transfer(a.tenant_id, internal(a.id, b.id, dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(id) if id == b.id));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_trace() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            fail_writes: AtomicBool::new(false),
        });
        let ledger = Ledger::new(store.clone(), Config::default());
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(500)).await;
        let b = open(&ledger, tenant, dec!(200)).await;

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = ledger
            .execute_transfer(tenant, internal(a.id, b.id, dec!(100)))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        assert_eq!(ledger.account(a.id).unwrap().balance_available, dec!(500));
        assert_eq!(ledger.account(b.id).unwrap().balance_available, dec!(200));
        assert_eq!(ledger.entries_for_account(a.id).unwrap().len(), 1);
        assert_eq!(ledger.entries_for_account(b.id).unwrap().len(), 1);
        assert!(ledger.transfers(tenant).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cross_border_capture_and_reversal() {
        let ledger = create_test_ledger();
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(1000)).await;

        let transfer = ledger
            .execute_transfer(tenant, cross_border(a.id, dec!(100), dec!(2.50)))
            .await
            .unwrap();
        assert_eq!(transfer.status, TransferStatus::Processing);

        let clearing = ledger.clearing_account(tenant, Currency::USD).await.unwrap();
        assert_eq!(clearing.id, transfer.to_account_id);
        assert_eq!(clearing.balance_total, dec!(102.50));
        assert_eq!(ledger.account(a.id).unwrap().balance_total, dec!(897.50));

        let reversed = ledger
            .reverse_transfer(transfer.id, "rail rejected")
            .await
            .unwrap();
        assert_eq!(reversed.status, TransferStatus::Failed);
        assert_eq!(reversed.failure_reason.as_deref(), Some("rail rejected"));
        assert_eq!(ledger.account(a.id).unwrap().balance_total, dec!(1000));
        assert_eq!(ledger.account(clearing.id).unwrap().balance_total, dec!(0));

        // Compensating pair, separate from the original entries
        assert_eq!(
            ledger
                .entries_for_reference(REFERENCE_REVERSAL, &transfer.id.to_string())
                .unwrap()
                .len(),
            2
        );
        ledger.reconcile_account(a.id).unwrap();
        ledger.reconcile_account(clearing.id).unwrap();

        let again = ledger.reverse_transfer(transfer.id, "twice").await.unwrap_err();
        assert!(matches!(again, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_status_machine_enforced() {
        let ledger = create_test_ledger();
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(1000)).await;
        let b = open(&ledger, tenant, dec!(0)).await;

        let done = ledger
            .execute_transfer(tenant, internal(a.id, b.id, dec!(1)))
            .await
            .unwrap();
        let err = ledger
            .update_transfer_status(done.id, TransferStatus::Processing, TransferUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let xb = ledger
            .execute_transfer(tenant, cross_border(a.id, dec!(10), dec!(0)))
            .await
            .unwrap();
        let early = ledger
            .update_transfer_status(xb.id, TransferStatus::Completed, TransferUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(early, Error::InvalidTransition { .. }));

        ledger
            .claim_for_settlement(xb.id, TransferStatus::Processing)
            .await
            .unwrap();
        let queued = ledger
            .update_transfer_status(xb.id, TransferStatus::Queued, TransferUpdate::default())
            .await
            .unwrap();
        assert_eq!(queued.status, TransferStatus::Queued);

        let failed = ledger
            .update_transfer_status(xb.id, TransferStatus::Failed, TransferUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(failed, Error::Validation(_)));

        let completed = ledger
            .update_transfer_status(
                xb.id,
                TransferStatus::Completed,
                TransferUpdate {
                    provider_reference: Some("E2E-1".to_string()),
                    ..TransferUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.provider_reference.as_deref(), Some("E2E-1"));
        assert!(completed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_settlement_claim_has_one_winner() {
        let ledger = Arc::new(create_test_ledger());
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(1000)).await;

        let xb = ledger
            .execute_transfer(tenant, cross_border(a.id, dec!(10), dec!(0)))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .claim_for_settlement(xb.id, TransferStatus::Processing)
                        .await
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(claimed) => {
                    assert_eq!(claimed.status, TransferStatus::Settling);
                    winners += 1;
                }
                Err(e) => assert!(matches!(
                    e,
                    Error::InvalidTransition {
                        from: TransferStatus::Settling,
                        ..
                    }
                )),
            }
        }
        assert_eq!(winners, 1);

        // A claim for the wrong starting status never succeeds
        let err = ledger
            .claim_for_settlement(xb.id, TransferStatus::Queued)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        // A settling transfer can still be reversed
        let reversed = ledger.reverse_transfer(xb.id, "rail rejected").await.unwrap();
        assert_eq!(reversed.status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_retryable() {
        let ledger = Ledger::new(
            Arc::new(MemoryStore::new()),
            Config {
                lock_timeout_ms: 50,
                ..Config::default()
            },
        );
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(10)).await;
        let b = open(&ledger, tenant, dec!(10)).await;

        let _held = ledger.lock_accounts(&[b.id]).await.unwrap();
        let err = ledger.transfer(request(a.id, b.id, dec!(1))).await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout(50)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_concurrent_opposite_transfers_conserve_money() {
        let ledger = Arc::new(create_test_ledger());
        let tenant = TenantId::new();
        let a = open(&ledger, tenant, dec!(1000)).await;
        let b = open(&ledger, tenant, dec!(1000)).await;

        let mut handles = Vec::new();
        for i in 0..100 {
            let ledger = ledger.clone();
            let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
            handles.push(tokio::spawn(async move {
                ledger.transfer(request(from, to, dec!(7))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(ledger.total_balance(Currency::USD).unwrap(), dec!(2000));
        assert_eq!(ledger.account(a.id).unwrap().balance_total, dec!(1000));
        ledger.reconcile_account(a.id).unwrap();
        ledger.reconcile_account(b.id).unwrap();
    }
}
