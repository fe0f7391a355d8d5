use ledger_core::{AccountId, Currency, Transfer, TransferId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settlement::{ExecuteRequest, Protocol, Rail, Recipient, SettlementResult};
use uuid::Uuid;

/// `POST /transfers`
///
/// Without a destination currency or recipient the transfer is internal
/// and needs `to_account_id`; otherwise it settles through an external rail.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateTransferRequest {
    pub from_account_id: AccountId,
    #[serde(default)]
    pub to_account_id: Option<AccountId>,
    pub amount: Decimal,
    #[serde(default)]
    pub destination_currency: Option<Currency>,
    #[serde(default)]
    pub destination_country: Option<String>,
    #[serde(default)]
    pub recipient: Option<Recipient>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateTransferRequest {
    pub fn is_internal(&self) -> bool {
        self.destination_currency.is_none() && self.recipient.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferResponse {
    pub transfer: Transfer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementResult>,
}

/// `POST /settlement/route`; without a transfer ID the decision is a quote
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteQuoteRequest {
    #[serde(default)]
    pub transfer_id: Option<TransferId>,
    #[serde(default)]
    pub protocol: Protocol,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub destination_currency: Option<Currency>,
    #[serde(default)]
    pub destination_country: Option<String>,
}

/// `POST /settlement/batch`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchRequest {
    pub items: Vec<ExecuteRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub total: usize,
    pub succeeded: usize,
    pub queued: usize,
    pub failed: usize,
    pub results: Vec<SettlementResult>,
}

impl BatchResponse {
    pub fn new(results: Vec<SettlementResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let queued = results.iter().filter(|r| r.queued).count();
        Self {
            total: results.len(),
            failed: results.len() - succeeded - queued,
            succeeded,
            queued,
            results,
        }
    }
}

/// `PUT /settlement/windows`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowRequest {
    pub rail: Rail,
    pub open_time: String,
    pub close_time: String,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub holiday_calendar: Option<String>,
    #[serde(default)]
    pub weekends_open: bool,
}

/// `POST /webhooks/replay`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayRequest {
    pub delivery_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}
