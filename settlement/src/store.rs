//! Settlement audit and queue storage
//!
//! Routing decisions, settlement attempts, queue items and window execution
//! logs. Queue claims are an atomic `queued -> processing` transition so two
//! scheduler instances never pick up the same item.

use crate::error::{Error, Result};
use crate::types::{
    QueueItemStatus, Rail, RoutingDecision, SettlementAttempt, SettlementQueueItem,
    WindowExecutionLog,
};
use chrono::{DateTime, Utc};
use ledger_core::{TenantId, TransferId};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Storage for settlement state
pub trait SettlementStore: Send + Sync {
    /// Persist a routing decision
    fn record_decision(&self, decision: RoutingDecision) -> Result<()>;

    /// Decisions for a transfer, oldest first
    fn decisions_for(&self, transfer_id: TransferId) -> Result<Vec<RoutingDecision>>;

    /// Persist a settlement attempt
    fn record_attempt(&self, attempt: SettlementAttempt) -> Result<()>;

    /// Attempts for a transfer, oldest first
    fn attempts_for(&self, transfer_id: TransferId) -> Result<Vec<SettlementAttempt>>;

    /// Add a queue item
    fn enqueue(&self, item: SettlementQueueItem) -> Result<()>;

    /// Get a queue item
    fn get_item(&self, id: Uuid) -> Result<SettlementQueueItem>;

    /// Replace a queue item
    fn update_item(&self, item: SettlementQueueItem) -> Result<()>;

    /// Queue items for a tenant, newest first
    fn items_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<SettlementQueueItem>>;

    /// Distinct (tenant, rail) pairs with queued items due at `now`
    fn due_pairs(&self, now: DateTime<Utc>) -> Result<Vec<(TenantId, Rail)>>;

    /// Atomically claim up to `limit` due items, marking them `processing`
    ///
    /// Order: priority descending, then `queued_at` ascending.
    fn claim_batch(
        &self,
        tenant_id: TenantId,
        rail: Rail,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SettlementQueueItem>>;

    /// Persist an execution log row
    fn record_execution_log(&self, log: WindowExecutionLog) -> Result<()>;

    /// Execution logs for a tenant, newest first
    fn execution_logs(&self, tenant_id: TenantId) -> Result<Vec<WindowExecutionLog>>;
}

#[derive(Default)]
struct Tables {
    decisions: HashMap<TransferId, Vec<RoutingDecision>>,
    attempts: HashMap<TransferId, Vec<SettlementAttempt>>,
    queue: HashMap<Uuid, SettlementQueueItem>,
    logs: Vec<WindowExecutionLog>,
}

/// In-memory settlement store
#[derive(Default)]
pub struct MemorySettlementStore {
    tables: RwLock<Tables>,
}

impl MemorySettlementStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemorySettlementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemorySettlementStore")
            .field("queue", &tables.queue.len())
            .field("logs", &tables.logs.len())
            .finish()
    }
}

impl SettlementStore for MemorySettlementStore {
    fn record_decision(&self, decision: RoutingDecision) -> Result<()> {
        self.tables
            .write()
            .decisions
            .entry(decision.transfer_id)
            .or_default()
            .push(decision);
        Ok(())
    }

    fn decisions_for(&self, transfer_id: TransferId) -> Result<Vec<RoutingDecision>> {
        Ok(self
            .tables
            .read()
            .decisions
            .get(&transfer_id)
            .cloned()
            .unwrap_or_default())
    }

    fn record_attempt(&self, attempt: SettlementAttempt) -> Result<()> {
        self.tables
            .write()
            .attempts
            .entry(attempt.transfer_id)
            .or_default()
            .push(attempt);
        Ok(())
    }

    fn attempts_for(&self, transfer_id: TransferId) -> Result<Vec<SettlementAttempt>> {
        Ok(self
            .tables
            .read()
            .attempts
            .get(&transfer_id)
            .cloned()
            .unwrap_or_default())
    }

    fn enqueue(&self, item: SettlementQueueItem) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.queue.contains_key(&item.id) {
            return Err(Error::Store(format!("Queue item {} already exists", item.id)));
        }
        tables.queue.insert(item.id, item);
        Ok(())
    }

    fn get_item(&self, id: Uuid) -> Result<SettlementQueueItem> {
        self.tables
            .read()
            .queue
            .get(&id)
            .cloned()
            .ok_or(Error::QueueItemNotFound(id))
    }

    fn update_item(&self, item: SettlementQueueItem) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.queue.get_mut(&item.id) {
            Some(existing) => {
                *existing = item;
                Ok(())
            }
            None => Err(Error::QueueItemNotFound(item.id)),
        }
    }

    fn items_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<SettlementQueueItem>> {
        let mut items: Vec<SettlementQueueItem> = self
            .tables
            .read()
            .queue
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));
        Ok(items)
    }

    fn due_pairs(&self, now: DateTime<Utc>) -> Result<Vec<(TenantId, Rail)>> {
        let pairs: BTreeSet<(TenantId, Rail)> = self
            .tables
            .read()
            .queue
            .values()
            .filter(|i| i.status == QueueItemStatus::Queued && i.scheduled_for <= now)
            .map(|i| (i.tenant_id, i.rail))
            .collect();
        Ok(pairs.into_iter().collect())
    }

    fn claim_batch(
        &self,
        tenant_id: TenantId,
        rail: Rail,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SettlementQueueItem>> {
        let mut tables = self.tables.write();

        let mut due: Vec<&SettlementQueueItem> = tables
            .queue
            .values()
            .filter(|i| {
                i.tenant_id == tenant_id
                    && i.rail == rail
                    && i.status == QueueItemStatus::Queued
                    && i.scheduled_for <= now
            })
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.queued_at.cmp(&b.queued_at))
        });
        let ids: Vec<Uuid> = due.into_iter().take(limit).map(|i| i.id).collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = tables.queue.get_mut(&id) {
                item.status = QueueItemStatus::Processing;
                item.attempted_at = Some(now);
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    fn record_execution_log(&self, log: WindowExecutionLog) -> Result<()> {
        self.tables.write().logs.push(log);
        Ok(())
    }

    fn execution_logs(&self, tenant_id: TenantId) -> Result<Vec<WindowExecutionLog>> {
        let mut logs: Vec<WindowExecutionLog> = self
            .tables
            .read()
            .logs
            .iter()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect();
        logs.reverse();
        Ok(logs)
    }
}
