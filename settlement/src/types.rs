//! Core types for settlement routing and window batching

use chrono::{DateTime, Utc};
use ledger_core::{Currency, TenantId, TransferId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// External settlement channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    /// Brazilian instant payments
    Pix,
    /// Mexican interbank transfers
    Spei,
    /// US automated clearing house
    Ach,
    /// SEPA credit transfer
    Sepa,
    /// International wire
    Wire,
    /// On-chain USDC
    Usdc,
}

impl Rail {
    /// Every rail, in catalog order
    pub const ALL: [Rail; 6] = [
        Rail::Pix,
        Rail::Spei,
        Rail::Ach,
        Rail::Sepa,
        Rail::Wire,
        Rail::Usdc,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Rail::Pix => "pix",
            Rail::Spei => "spei",
            Rail::Ach => "ach",
            Rail::Sepa => "sepa",
            Rail::Wire => "wire",
            Rail::Usdc => "usdc",
        }
    }
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rail {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Rail::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Validation(format!("Unknown rail: {}", s)))
    }
}

/// Protocol that triggered the settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Direct API call
    #[default]
    Internal,
    /// HTTP 402 payments
    X402,
    /// Agent payments protocol
    Ap2,
    /// Agentic commerce protocol
    Acp,
    /// Universal commerce protocol
    Ucp,
}

/// Pix key type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixKeyType {
    /// Individual taxpayer number
    Cpf,
    /// Company taxpayer number
    Cnpj,
    /// Email address
    Email,
    /// Phone number
    Phone,
    /// Random key
    Evp,
}

/// Beneficiary details handed to the rail adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    /// Pix beneficiary
    Pix {
        /// Pix key
        pix_key: String,
        /// Key type
        pix_key_type: PixKeyType,
        /// Beneficiary name
        name: String,
        /// CPF/CNPJ
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tax_id: Option<String>,
    },
    /// SPEI beneficiary
    Spei {
        /// 18-digit CLABE
        clabe: String,
        /// Beneficiary name
        name: String,
        /// Mexican tax ID
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rfc: Option<String>,
    },
    /// Bank account (ACH, SEPA, wire)
    BankAccount {
        /// Account number or IBAN
        account_number: String,
        /// Routing number, BIC or sort code
        routing_code: String,
        /// Account holder name
        name: String,
        /// ISO 3166 country code
        country: String,
    },
    /// Blockchain wallet
    Wallet {
        /// Wallet address
        address: String,
        /// Network name
        network: String,
    },
}

impl Recipient {
    /// Check the recipient can be paid on `rail`
    pub fn validate_for(&self, rail: Rail) -> crate::Result<()> {
        match (self, rail) {
            (Recipient::Pix { pix_key, name, .. }, Rail::Pix) => {
                if pix_key.trim().is_empty() || name.trim().is_empty() {
                    return Err(Error::Validation("Pix key and name are required".to_string()));
                }
                Ok(())
            }
            (Recipient::Spei { clabe, name, .. }, Rail::Spei) => {
                if clabe.len() != 18 || !clabe.chars().all(|c| c.is_ascii_digit()) {
                    return Err(Error::Validation("CLABE must be 18 digits".to_string()));
                }
                if name.trim().is_empty() {
                    return Err(Error::Validation("Beneficiary name is required".to_string()));
                }
                Ok(())
            }
            (Recipient::BankAccount { account_number, .. }, Rail::Ach | Rail::Sepa | Rail::Wire) => {
                if account_number.trim().is_empty() {
                    return Err(Error::Validation("Account number is required".to_string()));
                }
                Ok(())
            }
            (Recipient::Wallet { address, .. }, Rail::Usdc) => {
                if address.trim().is_empty() {
                    return Err(Error::Validation("Wallet address is required".to_string()));
                }
                Ok(())
            }
            (_, rail) => Err(Error::Validation(format!(
                "Recipient type cannot be paid on {}",
                rail
            ))),
        }
    }
}

/// Static fee and timing profile of a rail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailProfile {
    /// Rail
    pub rail: Rail,

    /// Human readable name
    pub display_name: String,

    /// Currencies the rail delivers
    pub currencies: Vec<Currency>,

    /// Destination countries (empty = any)
    pub countries: Vec<String>,

    /// Percentage fee as a fraction (0.005 = 0.5%)
    pub fee_percentage: Decimal,

    /// Fixed fee in the transfer currency
    pub fee_fixed: Decimal,

    /// Typical time to settle, in seconds
    pub estimated_time_secs: u64,

    /// Smallest accepted amount
    pub min_amount: Decimal,

    /// Largest accepted amount
    pub max_amount: Decimal,

    /// Settled through the window scheduler instead of immediately
    pub batched: bool,
}

impl RailProfile {
    /// Fee for `amount`
    pub fn fee_for(&self, amount: Decimal) -> Decimal {
        (amount * self.fee_percentage + self.fee_fixed).round_dp(2)
    }

    /// Whether the rail can carry this transfer
    pub fn accepts(&self, currency: Currency, country: Option<&str>, amount: Decimal) -> bool {
        let country_ok = match country {
            Some(c) if !self.countries.is_empty() => {
                self.countries.iter().any(|allowed| allowed.eq_ignore_ascii_case(c))
            }
            _ => true,
        };
        self.currencies.contains(&currency)
            && country_ok
            && amount >= self.min_amount
            && amount <= self.max_amount
    }
}

/// Priced option for a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteQuote {
    /// Rail
    pub rail: Rail,
    /// Currency the rail delivers; the fee is in this currency
    pub currency: Currency,
    /// Total fee
    pub fee: Decimal,
    /// Percentage component of the fee
    pub fee_percentage: Decimal,
    /// Estimated time to settle, in seconds
    pub estimated_time_secs: u64,
    /// Whether the rail settles in windows
    pub batched: bool,
}

impl RouteQuote {
    /// Fee converted to the source currency at `fx_rate` (source to rail)
    ///
    /// `None` for a non-positive rate.
    pub fn fee_in_source(&self, fx_rate: Decimal) -> Option<Decimal> {
        if fx_rate <= Decimal::ZERO {
            return None;
        }
        self.fee.checked_div(fx_rate).map(|fee| fee.round_dp(2))
    }
}

/// Input to routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Transfer being routed
    pub transfer_id: TransferId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Triggering protocol
    #[serde(default)]
    pub protocol: Protocol,
    /// Source amount
    pub amount: Decimal,
    /// Source currency
    pub currency: Currency,
    /// Amount delivered, in the destination currency; required when that
    /// currency differs from the source
    #[serde(default)]
    pub destination_amount: Option<Decimal>,
    /// Currency delivered to the recipient
    #[serde(default)]
    pub destination_currency: Option<Currency>,
    /// Recipient country
    #[serde(default)]
    pub destination_country: Option<String>,
}

/// Persisted routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Decision ID
    pub id: Uuid,
    /// Transfer
    pub transfer_id: TransferId,
    /// Tenant
    pub tenant_id: TenantId,
    /// Triggering protocol
    pub protocol: Protocol,
    /// Source amount
    pub amount: Decimal,
    /// Source currency
    pub currency: Currency,
    /// Amount the rail was quoted on, if converted
    pub destination_amount: Option<Decimal>,
    /// Destination currency, if different
    pub destination_currency: Option<Currency>,
    /// Destination country
    pub destination_country: Option<String>,
    /// Cheapest eligible rail
    pub selected_rail: Rail,
    /// Quote for the selected rail
    pub route: RouteQuote,
    /// Remaining eligible rails, best first
    pub alternative_rails: Vec<RouteQuote>,
    /// Decision time
    pub decided_at: DateTime<Utc>,
}

/// Request to settle on a specific rail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleRequest {
    /// Transfer
    pub transfer_id: TransferId,
    /// Tenant
    pub tenant_id: TenantId,
    /// Rail to use
    pub rail: Rail,
    /// Amount delivered
    pub amount: Decimal,
    /// Currency delivered
    pub currency: Currency,
    /// Beneficiary
    #[serde(default)]
    pub recipient: Option<Recipient>,
}

/// Request to route and settle a captured transfer end to end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Transfer in `processing`
    pub transfer_id: TransferId,
    /// Triggering protocol
    #[serde(default)]
    pub protocol: Protocol,
    /// Recipient country
    #[serde(default)]
    pub destination_country: Option<String>,
    /// Beneficiary
    #[serde(default)]
    pub recipient: Option<Recipient>,
    /// Queue priority for batched rails (higher first)
    #[serde(default)]
    pub priority: i32,
}

/// Outcome of a settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResult {
    /// Transfer
    pub transfer_id: TransferId,
    /// Whether money reached the rail
    pub success: bool,
    /// Last rail tried
    pub rail: Option<Rail>,
    /// Provider reference on success
    pub provider_reference: Option<String>,
    /// Error message on failure
    pub error: Option<String>,
    /// Whether the failure may succeed on retry
    pub retryable: bool,
    /// Adapter calls made
    pub attempts: u32,
    /// Handed to the window scheduler instead of settled now
    pub queued: bool,
}

impl SettlementResult {
    /// Failed result with no adapter call
    pub fn rejected(transfer_id: TransferId, rail: Option<Rail>, error: impl Into<String>) -> Self {
        Self {
            transfer_id,
            success: false,
            rail,
            provider_reference: None,
            error: Some(error.into()),
            retryable: false,
            attempts: 0,
            queued: false,
        }
    }
}

/// Audit row for one adapter call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementAttempt {
    /// Attempt ID
    pub id: Uuid,
    /// Transfer
    pub transfer_id: TransferId,
    /// Rail
    pub rail: Rail,
    /// 1-based attempt number on this rail
    pub attempt: u32,
    /// Whether the call succeeded
    pub success: bool,
    /// Provider reference on success
    pub provider_reference: Option<String>,
    /// Error on failure
    pub error: Option<String>,
    /// Whether the failure was retryable
    pub retryable: bool,
    /// Call duration
    pub duration_ms: u64,
    /// Attempt time
    pub at: DateTime<Utc>,
}

/// Queue item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    /// Waiting for the window
    Queued,
    /// Claimed by a cycle
    Processing,
    /// Settled on the rail
    Settled,
    /// Failed; not requeued automatically
    Failed,
}

/// One transfer waiting for a rail's window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementQueueItem {
    /// Item ID
    pub id: Uuid,
    /// Tenant
    pub tenant_id: TenantId,
    /// Rail
    pub rail: Rail,
    /// Transfer
    pub transfer_id: TransferId,
    /// Amount to deliver
    pub amount: Decimal,
    /// Currency to deliver
    pub currency: Currency,
    /// Beneficiary
    pub recipient: Option<Recipient>,
    /// Higher settles first
    pub priority: i32,
    /// Status
    pub status: QueueItemStatus,
    /// Not eligible before this time
    pub scheduled_for: DateTime<Utc>,
    /// Enqueue time (FIFO tie-break)
    pub queued_at: DateTime<Utc>,
    /// Claim time
    pub attempted_at: Option<DateTime<Utc>>,
    /// Settlement time
    pub settled_at: Option<DateTime<Utc>>,
    /// Failure message
    pub error: Option<String>,
    /// Provider reference
    pub provider_reference: Option<String>,
}

/// Audit row for one (tenant, rail) evaluation in a scheduler cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowExecutionLog {
    /// Log ID
    pub id: Uuid,
    /// Tenant
    pub tenant_id: TenantId,
    /// Rail
    pub rail: Rail,
    /// Cycle the row belongs to
    pub cycle_id: Uuid,
    /// Evaluation start
    pub started_at: DateTime<Utc>,
    /// Evaluation end
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Items claimed
    pub items_claimed: usize,
    /// Items settled
    pub items_settled: usize,
    /// Items failed
    pub items_failed: usize,
    /// Whether the window was open
    pub window_open: bool,
    /// Why the pair could not be processed
    #[serde(default)]
    pub error: Option<String>,
}
