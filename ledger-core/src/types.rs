//! Core types for the ledger
//!
//! All types are designed for:
//! - Exact arithmetic (Decimal for money, never floating point)
//! - Stable JSON representation (snake_case enums, string decimals)
//! - Append-only history (entries are created, never mutated)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new time-ordered identifier
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Tenant identifier
    TenantId
);
uuid_id!(
    /// Account identifier (ordering defines the lock order)
    AccountId
);
uuid_id!(
    /// Transfer identifier
    TransferId
);

/// ISO 4217 currency code (plus USDC for on-chain settlement)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
    /// Brazilian Real
    BRL,
    /// Mexican Peso
    MXN,
    /// Colombian Peso
    COP,
    /// USD Coin
    USDC,
}

impl Currency {
    /// Every supported currency
    pub const ALL: [Currency; 7] = [
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::BRL,
        Currency::MXN,
        Currency::COP,
        Currency::USDC,
    ];

    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::BRL => "BRL",
            Currency::MXN => "MXN",
            Currency::COP => "COP",
            Currency::USDC => "USDC",
        }
    }
}

impl FromStr for Currency {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Currency::ALL
            .iter()
            .copied()
            .find(|c| c.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::Validation(format!("Unsupported currency: {}", s)))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Account kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Tenant customer/agent wallet
    Customer,
    /// Holds funds captured for external settlement
    Clearing,
}

/// Account balances
///
/// Invariant: `balance_total == balance_available + balance_in_streams`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub id: AccountId,

    /// Owning tenant
    pub tenant_id: TenantId,

    /// Account currency
    pub currency: Currency,

    /// Account kind
    pub kind: AccountKind,

    /// Total balance
    pub balance_total: Decimal,

    /// Spendable balance
    pub balance_available: Decimal,

    /// Balance committed to payment streams
    pub balance_in_streams: Decimal,

    /// Reserved buffer (not part of the total)
    pub balance_buffer: Decimal,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create an empty account
    pub fn new(tenant_id: TenantId, currency: Currency, kind: AccountKind) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new(),
            tenant_id,
            currency,
            kind,
            balance_total: Decimal::ZERO,
            balance_available: Decimal::ZERO,
            balance_in_streams: Decimal::ZERO,
            balance_buffer: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the balance invariant
    pub fn is_consistent(&self) -> bool {
        self.balance_total == self.balance_available + self.balance_in_streams
            && self.balance_available >= Decimal::ZERO
    }
}

/// Ledger entry side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Money leaves the account
    Debit,
    /// Money enters the account
    Credit,
}

/// Immutable record of one side of a balance movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID
    pub id: Uuid,

    /// Account this entry belongs to
    pub account_id: AccountId,

    /// Debit or credit
    #[serde(rename = "type")]
    pub entry_type: EntryType,

    /// Amount moved (always positive)
    pub amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Account available balance after this entry
    pub balance_after: Decimal,

    /// What caused this entry (e.g. "transfer")
    pub reference_type: String,

    /// ID of the causing record
    pub reference_id: String,

    /// Free-form description
    pub description: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    /// Movement between two accounts on this ledger
    Internal,
    /// Movement out through an external rail
    CrossBorder,
}

/// Transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Created, nothing applied yet
    Pending,
    /// Funds captured, external settlement running
    Processing,
    /// Waiting for a settlement window
    Queued,
    /// Claimed by one settlement run; the rail call is in flight
    Settling,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
}

impl TransferStatus {
    /// Whether `self -> next` is an allowed transition
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Settling)
                | (Processing, Failed)
                | (Queued, Settling)
                | (Queued, Failed)
                | (Settling, Processing)
                | (Settling, Queued)
                | (Settling, Completed)
                | (Settling, Failed)
        )
    }

    /// Terminal states never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Queued => "queued",
            TransferStatus::Settling => "settling",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Financial record of a money movement (never deleted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// Transfer ID
    pub id: TransferId,

    /// Owning tenant
    pub tenant_id: TenantId,

    /// Internal or cross-border
    #[serde(rename = "type")]
    pub transfer_type: TransferType,

    /// Current status
    pub status: TransferStatus,

    /// Source account
    pub from_account_id: AccountId,

    /// Destination account (clearing account for cross-border)
    pub to_account_id: AccountId,

    /// Source amount
    pub amount: Decimal,

    /// Source currency
    pub currency: Currency,

    /// Amount delivered to the recipient
    pub destination_amount: Option<Decimal>,

    /// Currency delivered to the recipient
    pub destination_currency: Option<Currency>,

    /// Applied FX rate
    pub fx_rate: Option<Decimal>,

    /// Fee charged on top of `amount`
    pub fee_amount: Decimal,

    /// Client idempotency key, if any
    pub idempotency_key: Option<String>,

    /// Rail used for external settlement
    pub rail: Option<String>,

    /// Provider reference returned by the rail
    pub provider_reference: Option<String>,

    /// Failure reason for failed transfers
    pub failure_reason: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Completion timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// Total debited from the source account
    pub fn total_debit(&self) -> Decimal {
        self.amount + self.fee_amount
    }
}

/// Request to move money between two accounts
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Source account
    pub from_account_id: AccountId,
    /// Destination account
    pub to_account_id: AccountId,
    /// Amount (must be positive)
    pub amount: Decimal,
    /// Reference type recorded on both entries
    pub reference_type: String,
    /// Reference ID recorded on both entries
    pub reference_id: String,
    /// Optional description
    pub description: Option<String>,
}

/// Result of a successful balance movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Source available balance after the movement
    pub new_from_balance: Decimal,
    /// Destination available balance after the movement
    pub new_to_balance: Decimal,
    /// Debit entry ID
    pub debit_entry_id: Uuid,
    /// Credit entry ID
    pub credit_entry_id: Uuid,
}

/// Caller input for creating a transfer record
#[derive(Debug, Clone)]
pub struct NewTransfer {
    /// Internal or cross-border
    pub transfer_type: TransferType,
    /// Source account
    pub from_account_id: AccountId,
    /// Destination account; ignored for cross-border (clearing account is used)
    pub to_account_id: Option<AccountId>,
    /// Source amount
    pub amount: Decimal,
    /// Fee charged on top of the amount
    pub fee_amount: Decimal,
    /// Destination amount after FX
    pub destination_amount: Option<Decimal>,
    /// Destination currency
    pub destination_currency: Option<Currency>,
    /// FX rate
    pub fx_rate: Option<Decimal>,
    /// Selected rail
    pub rail: Option<String>,
    /// Client idempotency key
    pub idempotency_key: Option<String>,
    /// Description for the ledger entries
    pub description: Option<String>,
}

/// Optional fields written together with a status change
#[derive(Debug, Clone, Default)]
pub struct TransferUpdate {
    /// Rail that carried (or is carrying) the transfer
    pub rail: Option<String>,
    /// Provider reference returned by the rail
    pub provider_reference: Option<String>,
    /// Failure reason
    pub failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_from_str() {
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::USD);
        assert_eq!("brl".parse::<Currency>().unwrap(), Currency::BRL);
        assert!("XYZ".parse::<Currency>().is_err());
    }

    #[test]
    fn test_transfer_status_machine() {
        use TransferStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Settling));
        assert!(Settling.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Settling));
        assert!(Settling.can_transition_to(Completed));
        assert!(!Settling.can_transition_to(Settling));
        assert!(!Processing.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Queued.can_transition_to(Pending));
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_entry_type_serializes_as_type() {
        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            account_id: AccountId::new(),
            entry_type: EntryType::Debit,
            amount: Decimal::ONE,
            currency: Currency::USD,
            balance_after: Decimal::ZERO,
            reference_type: "transfer".to_string(),
            reference_id: "t-1".to_string(),
            description: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "debit");
        assert_eq!(json["amount"], "1");
    }
}
