//! Settlement window scheduler
//!
//! Batched rails settle from a queue on a fixed polling interval. Each
//! cycle:
//!
//! 1. Find (tenant, rail) pairs with queued items due now
//! 2. Skip pairs whose window is closed (weekend, holiday, outside hours)
//! 3. Claim up to `max_batch_size` items, priority first then FIFO; the
//!    claim marks them `processing` so a concurrent cycle cannot take them
//! 4. Settle each item on its own; success completes the transfer, failure
//!    reverses it. Failed items are not requeued
//! 5. Write one execution log row per evaluated pair
//!
//! A pair whose batch cannot be claimed still gets its log row, with zero
//! counts and the error; the cycle moves on to the next pair.
//!
//! A window closing mid-batch does not stop items already claimed.

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::metrics::{WINDOW_CYCLES_TOTAL, WINDOW_ITEMS_TOTAL};
use crate::router::SettlementRouter;
use crate::types::{
    QueueItemStatus, Rail, Recipient, SettleRequest, SettlementQueueItem, WindowExecutionLog,
};
use crate::window::WindowManager;
use chrono::{DateTime, Utc};
use ledger_core::{TenantId, TransferId, TransferStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Summary of one scheduler cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Cycle ID shared by the cycle's log rows
    pub cycle_id: Uuid,
    /// (tenant, rail) pairs with due items
    pub pairs_evaluated: usize,
    /// Pairs skipped because the window was closed
    pub windows_closed: usize,
    /// Items claimed
    pub items_claimed: usize,
    /// Items settled
    pub items_settled: usize,
    /// Items failed
    pub items_failed: usize,
    /// Pairs that errored before settling anything
    pub pairs_failed: usize,
}

/// Settlement window scheduler
pub struct WindowScheduler {
    router: Arc<SettlementRouter>,
    windows: Arc<WindowManager>,
    config: SchedulerConfig,
}

impl WindowScheduler {
    /// Create scheduler
    pub fn new(router: Arc<SettlementRouter>, windows: Arc<WindowManager>, config: SchedulerConfig) -> Self {
        Self {
            router,
            windows,
            config,
        }
    }

    /// Window configuration
    pub fn windows(&self) -> &Arc<WindowManager> {
        &self.windows
    }

    /// Queue a transfer for a batched rail
    pub async fn enqueue(
        &self,
        transfer_id: TransferId,
        rail: Rail,
        recipient: Option<Recipient>,
        priority: i32,
        scheduled_for: DateTime<Utc>,
    ) -> Result<SettlementQueueItem> {
        self.router
            .enqueue(transfer_id, rail, recipient, priority, scheduled_for)
            .await
    }

    /// Queue items for a tenant, newest first
    pub fn queue(&self, tenant_id: TenantId) -> Result<Vec<SettlementQueueItem>> {
        self.router.store().items_for_tenant(tenant_id)
    }

    /// Execution logs for a tenant, newest first
    pub fn logs(&self, tenant_id: TenantId) -> Result<Vec<WindowExecutionLog>> {
        self.router.store().execution_logs(tenant_id)
    }

    /// Run one cycle as of `now`
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        WINDOW_CYCLES_TOTAL.inc();

        let mut report = CycleReport {
            cycle_id: Uuid::new_v4(),
            ..CycleReport::default()
        };

        let pairs = self.router.store().due_pairs(now)?;
        if pairs.is_empty() {
            debug!("No queued settlements due");
            return Ok(report);
        }

        for (tenant_id, rail) in pairs {
            report.pairs_evaluated += 1;
            let started_at = Utc::now();
            let started = Instant::now();

            let window_open = match self.windows.is_window_open(tenant_id, rail, now) {
                Ok(open) => open,
                Err(e) => {
                    warn!(tenant_id = %tenant_id, rail = %rail, "Window check failed, treating as closed: {}", e);
                    false
                }
            };

            let mut pair_error = None;
            let (claimed, settled, failed) = if window_open {
                match self.process_pair(tenant_id, rail, now).await {
                    Ok(counts) => counts,
                    Err(e) => {
                        error!(tenant_id = %tenant_id, rail = %rail, "Settlement batch failed: {}", e);
                        report.pairs_failed += 1;
                        pair_error = Some(e.to_string());
                        (0, 0, 0)
                    }
                }
            } else {
                report.windows_closed += 1;
                debug!(tenant_id = %tenant_id, rail = %rail, "Window closed, skipping");
                (0, 0, 0)
            };

            report.items_claimed += claimed;
            report.items_settled += settled;
            report.items_failed += failed;

            let log = WindowExecutionLog {
                id: Uuid::new_v4(),
                tenant_id,
                rail,
                cycle_id: report.cycle_id,
                started_at,
                finished_at: Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
                items_claimed: claimed,
                items_settled: settled,
                items_failed: failed,
                window_open,
                error: pair_error,
            };
            if let Err(e) = self.router.store().record_execution_log(log) {
                error!(tenant_id = %tenant_id, rail = %rail, "Failed to write execution log: {}", e);
            }
        }

        info!(
            cycle_id = %report.cycle_id,
            pairs = report.pairs_evaluated,
            closed = report.windows_closed,
            settled = report.items_settled,
            failed = report.items_failed,
            pairs_failed = report.pairs_failed,
            "Settlement window cycle complete"
        );
        Ok(report)
    }

    async fn process_pair(&self, tenant_id: TenantId, rail: Rail, now: DateTime<Utc>) -> Result<(usize, usize, usize)> {
        let items = self
            .router
            .store()
            .claim_batch(tenant_id, rail, now, self.config.max_batch_size)?;

        let claimed = items.len();
        let mut settled = 0;
        let mut failed = 0;
        for item in items {
            if self.process_item(item).await {
                settled += 1;
            } else {
                failed += 1;
            }
        }
        Ok((claimed, settled, failed))
    }

    /// Settle one claimed item; returns whether it settled
    async fn process_item(&self, mut item: SettlementQueueItem) -> bool {
        if let Err(e) = self.router.claim(item.transfer_id, TransferStatus::Queued).await {
            warn!(item_id = %item.id, transfer_id = %item.transfer_id, "Cannot start queued settlement: {}", e);
            item.status = QueueItemStatus::Failed;
            item.error = Some(e.to_string());
            self.save(item);
            return false;
        }

        let result = self
            .router
            .settle(&SettleRequest {
                transfer_id: item.transfer_id,
                tenant_id: item.tenant_id,
                rail: item.rail,
                amount: item.amount,
                currency: item.currency,
                recipient: item.recipient.clone(),
            })
            .await;

        let (transfer_id, rail) = (item.transfer_id, item.rail);
        if result.success {
            item.status = QueueItemStatus::Settled;
            item.settled_at = Some(Utc::now());
            item.provider_reference = result.provider_reference.clone();
            self.save(item);
            WINDOW_ITEMS_TOTAL.with_label_values(&[rail.as_str(), "settled"]).inc();

            if let Err(e) = self
                .router
                .complete_transfer(transfer_id, rail, result.provider_reference)
                .await
            {
                error!(transfer_id = %transfer_id, "Settled on rail but transfer not completed: {}", e);
            }
            true
        } else {
            let reason = result.error.unwrap_or_else(|| "Settlement failed".to_string());
            item.status = QueueItemStatus::Failed;
            item.error = Some(reason.clone());
            self.save(item);
            WINDOW_ITEMS_TOTAL.with_label_values(&[rail.as_str(), "failed"]).inc();

            if let Err(e) = self.router.fail_transfer(transfer_id, Some(rail), &reason).await {
                error!(transfer_id = %transfer_id, "Failed to reverse transfer: {}", e);
            }
            false
        }
    }

    fn save(&self, item: SettlementQueueItem) {
        let id = item.id;
        if let Err(e) = self.router.store().update_item(item) {
            error!(item_id = %id, "Failed to update queue item: {}", e);
        }
    }

    /// Poll until `shutdown` flips to true; an in-flight cycle always finishes
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.poll_interval_secs,
            max_batch_size = self.config.max_batch_size,
            "Starting settlement window scheduler"
        );
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.poll_interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        warn!("Settlement window cycle failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Settlement window scheduler stopped");
    }
}

impl std::fmt::Debug for WindowScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowScheduler")
            .field("config", &self.config)
            .finish()
    }
}
