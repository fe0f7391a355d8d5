//! Durable tier
//!
//! The `idempotency_keys` table: one record per `(tenant_id, key)`. The
//! store must make `insert_pending` an atomic insert-if-absent, which is
//! what turns a miss into a reservation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::Result;
use crate::types::{IdempotencyRecord, InsertOutcome};

/// Durable record storage
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Insert unless a live record exists; expired records are replaced
    async fn insert_pending(
        &self,
        record: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    /// Upsert the completed record
    async fn complete(&self, record: IdempotencyRecord) -> Result<()>;

    /// Delete the record for a key, if any
    async fn remove(&self, tenant_id: &str, key: &str) -> Result<()>;

    /// Delete expired records, returning how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// In-memory store; the entry API makes `insert_pending` atomic per key
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: DashMap<(String, String), IdempotencyRecord>,
}

impl MemoryIdempotencyStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Records held, expired ones included until purged
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn insert_pending(
        &self,
        record: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let id = (record.tenant_id.clone(), record.key.clone());
        match self.records.entry(id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(record);
                    Ok(InsertOutcome::Inserted)
                } else {
                    Ok(InsertOutcome::Existing(occupied.get().clone()))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn complete(&self, record: IdempotencyRecord) -> Result<()> {
        self.records
            .insert((record.tenant_id.clone(), record.key.clone()), record);
        Ok(())
    }

    async fn remove(&self, tenant_id: &str, key: &str) -> Result<()> {
        self.records.remove(&(tenant_id.to_string(), key.to_string()));
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        Ok(before.saturating_sub(self.records.len()))
    }
}
