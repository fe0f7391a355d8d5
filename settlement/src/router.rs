//! Settlement router
//!
//! Picks the cheapest eligible rail for a captured cross-border transfer and
//! drives it to a terminal state:
//!
//! 1. **Claim**: move the transfer to `settling` under the ledger's transfer
//!    lock; a caller that loses the claim never reaches a rail
//! 2. **Route**: quote every rail from the catalog against the amount it
//!    delivers, persist the decision
//! 3. **Dispatch**: batched rails go to the window queue, instant rails are
//!    settled now with bounded retries and a per-attempt timeout
//! 4. **Fallback**: a retryable failure that outlives its retries moves on
//!    to the next alternative rail
//! 5. **Finalize**: completed, or reversed in the ledger and failed, with
//!    lifecycle events either way
//!
//! Batches are not transactional across items: each item is settled and
//! finalized on its own.

use crate::adapters::{AdapterReceipt, AdapterRegistry, AdapterRequest, RailAdapter};
use crate::config::RouterConfig;
use crate::error::{Error, RailError, Result};
use crate::events::{EventSink, SettlementEvent, SettlementEventKind};
use crate::metrics::{ROUTING_DECISIONS_TOTAL, SETTLEMENT_ATTEMPTS_TOTAL, SETTLEMENT_ATTEMPT_DURATION};
use crate::rails::RailCatalog;
use crate::retry::RetryStrategy;
use crate::store::SettlementStore;
use crate::types::{
    ExecuteRequest, QueueItemStatus, Rail, Recipient, RouteQuote, RouteRequest, RoutingDecision,
    SettleRequest, SettlementAttempt, SettlementQueueItem, SettlementResult,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use ledger_core::{
    Currency, Ledger, Transfer, TransferId, TransferStatus, TransferType, TransferUpdate,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Settlement router
pub struct SettlementRouter {
    ledger: Arc<Ledger>,
    catalog: RailCatalog,
    adapters: AdapterRegistry,
    store: Arc<dyn SettlementStore>,
    events: Arc<dyn EventSink>,
    retry: RetryStrategy,
    config: RouterConfig,
}

impl SettlementRouter {
    /// Create router
    pub fn new(
        ledger: Arc<Ledger>,
        catalog: RailCatalog,
        adapters: AdapterRegistry,
        store: Arc<dyn SettlementStore>,
        events: Arc<dyn EventSink>,
        config: RouterConfig,
    ) -> Self {
        Self {
            ledger,
            catalog,
            adapters,
            store,
            events,
            retry: RetryStrategy::new(config.retry.clone()),
            config,
        }
    }

    /// Rail catalog
    pub fn catalog(&self) -> &RailCatalog {
        &self.catalog
    }

    /// Ledger the router finalizes transfers on
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Settlement store
    pub fn store(&self) -> &Arc<dyn SettlementStore> {
        &self.store
    }

    /// Pick the cheapest eligible rail and persist the decision
    pub fn route(&self, request: &RouteRequest) -> Result<RoutingDecision> {
        if request.amount <= Decimal::ZERO {
            return Err(Error::Validation("Amount must be positive".to_string()));
        }

        let (amount, currency) = routed(request)?;
        let country = request.destination_country.as_deref();
        let mut quotes = self.catalog.quotes(currency, country, amount).into_iter();

        let route = quotes.next().ok_or_else(|| Error::NoRoute {
            amount,
            currency,
            country: country.unwrap_or("any").to_string(),
        })?;

        let decision = RoutingDecision {
            id: Uuid::new_v4(),
            transfer_id: request.transfer_id,
            tenant_id: request.tenant_id,
            protocol: request.protocol,
            amount: request.amount,
            currency: request.currency,
            destination_amount: request.destination_amount,
            destination_currency: request.destination_currency,
            destination_country: request.destination_country.clone(),
            selected_rail: route.rail,
            route,
            alternative_rails: quotes.collect(),
            decided_at: Utc::now(),
        };
        self.store.record_decision(decision.clone())?;

        ROUTING_DECISIONS_TOTAL
            .with_label_values(&[decision.selected_rail.as_str()])
            .inc();
        info!(
            transfer_id = %decision.transfer_id,
            rail = %decision.selected_rail,
            fee = %decision.route.fee,
            alternatives = decision.alternative_rails.len(),
            "Routing decision"
        );
        Ok(decision)
    }

    /// Settle on one rail with retries
    ///
    /// Never fails as a call: every problem is reported in the result.
    pub async fn settle(&self, request: &SettleRequest) -> SettlementResult {
        let adapter = match self.adapters.get(request.rail) {
            Ok(adapter) => adapter,
            Err(e) => return SettlementResult::rejected(request.transfer_id, Some(request.rail), e.to_string()),
        };
        if let Some(recipient) = &request.recipient {
            if let Err(e) = recipient.validate_for(request.rail) {
                return SettlementResult::rejected(request.transfer_id, Some(request.rail), e.to_string());
            }
        }

        let adapter_request = AdapterRequest {
            transfer_id: request.transfer_id,
            amount: request.amount,
            currency: request.currency,
            recipient: request.recipient.clone(),
        };

        let mut calls = 0;
        let outcome = self
            .retry
            .execute_with_retry(
                |attempt| {
                    calls = attempt;
                    let adapter = Arc::clone(&adapter);
                    let adapter_request = &adapter_request;
                    async move {
                        self.attempt(adapter.as_ref(), adapter_request, attempt)
                            .await
                            .map_err(Error::Rail)
                    }
                },
                "settle",
            )
            .await;

        match outcome {
            Ok(receipt) => SettlementResult {
                transfer_id: request.transfer_id,
                success: true,
                rail: Some(request.rail),
                provider_reference: Some(receipt.provider_reference),
                error: None,
                retryable: false,
                attempts: calls,
                queued: false,
            },
            Err(e) => SettlementResult {
                transfer_id: request.transfer_id,
                success: false,
                rail: Some(request.rail),
                provider_reference: None,
                error: Some(e.to_string()),
                retryable: e.is_retryable(),
                attempts: calls,
                queued: false,
            },
        }
    }

    /// One adapter call under the attempt timeout, recorded for audit
    async fn attempt(
        &self,
        adapter: &dyn RailAdapter,
        request: &AdapterRequest,
        attempt: u32,
    ) -> std::result::Result<AdapterReceipt, RailError> {
        let rail = adapter.rail();
        let timeout = Duration::from_secs(self.config.attempt_timeout_secs);
        let started = Instant::now();

        let (result, outcome) = match tokio::time::timeout(timeout, adapter.settle(request)).await {
            Ok(Ok(receipt)) => (Ok(receipt), "success"),
            Ok(Err(e)) if e.retryable => (Err(e), "retryable"),
            Ok(Err(e)) => (Err(e), "terminal"),
            Err(_) => (
                Err(RailError::retryable(
                    rail,
                    format!("Timed out after {}s", timeout.as_secs()),
                )),
                "timeout",
            ),
        };

        let elapsed = started.elapsed();
        SETTLEMENT_ATTEMPTS_TOTAL
            .with_label_values(&[rail.as_str(), outcome])
            .inc();
        SETTLEMENT_ATTEMPT_DURATION
            .with_label_values(&[rail.as_str()])
            .observe(elapsed.as_secs_f64());

        let record = SettlementAttempt {
            id: Uuid::new_v4(),
            transfer_id: request.transfer_id,
            rail,
            attempt,
            success: result.is_ok(),
            provider_reference: result.as_ref().ok().map(|r| r.provider_reference.clone()),
            error: result.as_ref().err().map(|e| e.message.clone()),
            retryable: result.as_ref().err().map(|e| e.retryable).unwrap_or(false),
            duration_ms: elapsed.as_millis() as u64,
            at: Utc::now(),
        };
        if let Err(e) = self.store.record_attempt(record) {
            warn!(transfer_id = %request.transfer_id, "Failed to record settlement attempt: {}", e);
        }

        result
    }

    /// Route and settle a captured cross-border transfer end to end
    ///
    /// Errors are reserved for requests that cannot start (unknown transfer,
    /// wrong state, ledger failure). Rail outcomes are in the result.
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<SettlementResult> {
        let transfer = self.ledger.transfer_record(request.transfer_id)?;
        if transfer.transfer_type != TransferType::CrossBorder {
            return Err(Error::Validation(
                "Only cross-border transfers settle through a rail".to_string(),
            ));
        }
        let transfer = self.claim(transfer.id, TransferStatus::Processing).await?;

        let route_request = RouteRequest {
            transfer_id: transfer.id,
            tenant_id: transfer.tenant_id,
            protocol: request.protocol,
            amount: transfer.amount,
            currency: transfer.currency,
            destination_amount: transfer.destination_amount,
            destination_currency: transfer.destination_currency,
            destination_country: request.destination_country.clone(),
        };
        let decision = match self.route(&route_request) {
            Ok(decision) => decision,
            Err(e @ Error::NoRoute { .. }) => {
                let message = e.to_string();
                self.fail_transfer(transfer.id, None, &message).await?;
                return Ok(SettlementResult::rejected(transfer.id, None, message));
            }
            Err(e) => {
                self.release(transfer.id).await;
                return Err(e);
            }
        };

        let mut candidates = vec![decision.route.clone()];
        if self.config.reroute_on_retryable {
            candidates.extend(decision.alternative_rails.iter().cloned());
        }

        let (amount, currency) = delivered(&transfer);
        let mut last = None;
        let mut total_attempts = 0;

        for quote in candidates {
            if quote.batched {
                return self
                    .enqueue_for_window(&transfer, &quote, request.recipient.clone(), request.priority)
                    .await;
            }

            let mut result = self
                .settle(&SettleRequest {
                    transfer_id: transfer.id,
                    tenant_id: transfer.tenant_id,
                    rail: quote.rail,
                    amount,
                    currency,
                    recipient: request.recipient.clone(),
                })
                .await;
            total_attempts += result.attempts;
            result.attempts = total_attempts;

            if result.success {
                self.complete_transfer(transfer.id, quote.rail, result.provider_reference.clone())
                    .await?;
                return Ok(result);
            }
            if !result.retryable {
                let reason = result.error.clone().unwrap_or_default();
                self.fail_transfer(transfer.id, Some(quote.rail), &reason).await?;
                return Ok(result);
            }

            warn!(
                transfer_id = %transfer.id,
                rail = %quote.rail,
                "Retries exhausted on rail, trying next alternative"
            );
            last = Some(result);
        }

        let result = last.unwrap_or_else(|| {
            SettlementResult::rejected(transfer.id, None, "No rail could be tried")
        });
        let reason = result.error.clone().unwrap_or_default();
        self.fail_transfer(transfer.id, result.rail, &reason).await?;
        Ok(result)
    }

    /// Win the settlement claim on a transfer currently in `expected`
    ///
    /// Losing the claim is a validation error: another run owns the transfer.
    pub async fn claim(&self, transfer_id: TransferId, expected: TransferStatus) -> Result<Transfer> {
        match self.ledger.claim_for_settlement(transfer_id, expected).await {
            Ok(transfer) => Ok(transfer),
            Err(ledger_core::Error::InvalidTransition { from, .. }) => Err(Error::Validation(format!(
                "Transfer {} is {}, expected {}",
                transfer_id, from, expected
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Hand a claimed transfer back untouched; no rail was called
    async fn release(&self, transfer_id: TransferId) {
        if let Err(e) = self
            .ledger
            .update_transfer_status(transfer_id, TransferStatus::Processing, TransferUpdate::default())
            .await
        {
            error!(transfer_id = %transfer_id, "Failed to release settlement claim: {}", e);
        }
    }

    /// Execute many transfers concurrently; one failure never affects another
    pub async fn settle_batch(&self, requests: &[ExecuteRequest]) -> Vec<SettlementResult> {
        let futures = requests.iter().map(|request| async move {
            match self.execute(request).await {
                Ok(result) => result,
                Err(e) => {
                    error!(transfer_id = %request.transfer_id, "Batch item failed: {}", e);
                    let mut result = SettlementResult::rejected(request.transfer_id, None, e.to_string());
                    result.retryable = e.is_retryable();
                    result
                }
            }
        });
        join_all(futures).await
    }

    async fn enqueue_for_window(
        &self,
        transfer: &Transfer,
        quote: &RouteQuote,
        recipient: Option<Recipient>,
        priority: i32,
    ) -> Result<SettlementResult> {
        if let Some(recipient) = &recipient {
            if let Err(e) = recipient.validate_for(quote.rail) {
                let message = e.to_string();
                self.fail_transfer(transfer.id, Some(quote.rail), &message).await?;
                return Ok(SettlementResult::rejected(transfer.id, Some(quote.rail), message));
            }
        }

        let item = match self
            .queue_claimed(transfer, quote.rail, recipient, priority, Utc::now())
            .await
        {
            Ok(item) => item,
            Err(e) => {
                self.release(transfer.id).await;
                return Err(e);
            }
        };
        Ok(SettlementResult {
            transfer_id: transfer.id,
            success: false,
            rail: Some(item.rail),
            provider_reference: None,
            error: None,
            retryable: false,
            attempts: 0,
            queued: true,
        })
    }

    /// Put a captured transfer in a rail's window queue and mark it `queued`
    pub async fn enqueue(
        &self,
        transfer_id: TransferId,
        rail: Rail,
        recipient: Option<Recipient>,
        priority: i32,
        scheduled_for: DateTime<Utc>,
    ) -> Result<SettlementQueueItem> {
        let transfer = self.claim(transfer_id, TransferStatus::Processing).await?;
        match self
            .queue_claimed(&transfer, rail, recipient, priority, scheduled_for)
            .await
        {
            Ok(item) => Ok(item),
            Err(e) => {
                self.release(transfer_id).await;
                Err(e)
            }
        }
    }

    async fn queue_claimed(
        &self,
        transfer: &Transfer,
        rail: Rail,
        recipient: Option<Recipient>,
        priority: i32,
        scheduled_for: DateTime<Utc>,
    ) -> Result<SettlementQueueItem> {
        let (amount, currency) = delivered(transfer);
        let now = Utc::now();
        let item = SettlementQueueItem {
            id: Uuid::new_v4(),
            tenant_id: transfer.tenant_id,
            rail,
            transfer_id: transfer.id,
            amount,
            currency,
            recipient,
            priority,
            status: QueueItemStatus::Queued,
            scheduled_for,
            queued_at: now,
            attempted_at: None,
            settled_at: None,
            error: None,
            provider_reference: None,
        };
        self.store.enqueue(item.clone())?;

        let update = TransferUpdate {
            rail: Some(rail.to_string()),
            ..TransferUpdate::default()
        };
        if let Err(e) = self
            .ledger
            .update_transfer_status(transfer.id, TransferStatus::Queued, update)
            .await
        {
            let mut failed = item;
            failed.status = QueueItemStatus::Failed;
            failed.error = Some(e.to_string());
            self.store.update_item(failed)?;
            return Err(e.into());
        }

        info!(
            transfer_id = %transfer.id,
            rail = %rail,
            item_id = %item.id,
            priority,
            "Transfer queued for settlement window"
        );
        Ok(item)
    }

    /// Mark a transfer completed and emit success events
    pub async fn complete_transfer(
        &self,
        transfer_id: TransferId,
        rail: Rail,
        provider_reference: Option<String>,
    ) -> Result<Transfer> {
        let update = TransferUpdate {
            rail: Some(rail.to_string()),
            provider_reference: provider_reference.clone(),
            failure_reason: None,
        };
        let transfer = self
            .ledger
            .update_transfer_status(transfer_id, TransferStatus::Completed, update)
            .await?;

        let (amount, currency) = delivered(&transfer);
        self.events
            .publish(
                SettlementEvent::new(
                    SettlementEventKind::SettlementCompleted,
                    transfer.tenant_id,
                    transfer.id,
                    amount,
                    currency,
                )
                .with_rail(rail)
                .with_reference(provider_reference.clone()),
            )
            .await;
        self.events
            .publish(
                SettlementEvent::new(
                    SettlementEventKind::TransferCompleted,
                    transfer.tenant_id,
                    transfer.id,
                    transfer.amount,
                    transfer.currency,
                )
                .with_rail(rail)
                .with_reference(provider_reference),
            )
            .await;

        info!(transfer_id = %transfer.id, rail = %rail, "Transfer settled");
        Ok(transfer)
    }

    /// Reverse the capture, mark the transfer failed and emit failure events
    pub async fn fail_transfer(
        &self,
        transfer_id: TransferId,
        rail: Option<Rail>,
        reason: &str,
    ) -> Result<Transfer> {
        let transfer = self.ledger.reverse_transfer(transfer_id, reason).await?;

        if let Some(rail) = rail {
            let (amount, currency) = delivered(&transfer);
            self.events
                .publish(
                    SettlementEvent::new(
                        SettlementEventKind::SettlementFailed,
                        transfer.tenant_id,
                        transfer.id,
                        amount,
                        currency,
                    )
                    .with_rail(rail)
                    .with_error(reason),
                )
                .await;
        }

        let mut event = SettlementEvent::new(
            SettlementEventKind::TransferFailed,
            transfer.tenant_id,
            transfer.id,
            transfer.amount,
            transfer.currency,
        )
        .with_error(reason);
        event.rail = rail;
        self.events.publish(event).await;

        warn!(transfer_id = %transfer.id, reason, "Transfer settlement failed");
        Ok(transfer)
    }

    /// Settlement attempts for a transfer
    pub fn attempts(&self, transfer_id: TransferId) -> Result<Vec<SettlementAttempt>> {
        self.store.attempts_for(transfer_id)
    }

    /// Routing decisions for a transfer
    pub fn decisions(&self, transfer_id: TransferId) -> Result<Vec<RoutingDecision>> {
        self.store.decisions_for(transfer_id)
    }
}

impl std::fmt::Debug for SettlementRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementRouter")
            .field("adapters", &self.adapters)
            .field("config", &self.config)
            .finish()
    }
}

/// Amount and currency a route request must deliver
///
/// Rail limits and fees are in the rail's currency, so a cross-currency
/// route is quoted on the converted amount.
fn routed(request: &RouteRequest) -> Result<(Decimal, Currency)> {
    match request.destination_currency {
        Some(currency) if currency != request.currency => match request.destination_amount {
            Some(amount) if amount > Decimal::ZERO => Ok((amount, currency)),
            Some(_) => Err(Error::Validation("Destination amount must be positive".to_string())),
            None => Err(Error::Validation(format!(
                "Destination amount required to route {} -> {}",
                request.currency, currency
            ))),
        },
        _ => Ok((request.amount, request.currency)),
    }
}

/// Amount and currency the recipient receives
fn delivered(transfer: &Transfer) -> (Decimal, Currency) {
    (
        transfer.destination_amount.unwrap_or(transfer.amount),
        transfer.destination_currency.unwrap_or(transfer.currency),
    )
}
