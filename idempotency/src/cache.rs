//! In-process hot tier
//!
//! Holds completed records only. Owned by the service, which is built
//! explicitly at startup and swept by its background task.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::types::IdempotencyRecord;

#[derive(Debug, Clone)]
struct CacheEntry {
    record: IdempotencyRecord,
    evict_at: DateTime<Utc>,
}

/// Hot cache counters
#[derive(Default, Debug)]
pub struct CacheMetrics {
    /// Lookups answered from the cache
    pub hits: AtomicU64,
    /// Lookups that fell through
    pub misses: AtomicU64,
    /// Records inserted
    pub sets: AtomicU64,
    /// Entries dropped by sweeps
    pub evictions: AtomicU64,
}

impl CacheMetrics {
    /// Hits as a percentage of lookups
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (hits as f64) / (total as f64) * 100.0
        }
    }
}

/// TTL cache of completed idempotency records
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<(String, String), CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    metrics: CacheMetrics,
}

impl ResponseCache {
    /// Cache holding at most `max_entries` records for `ttl_secs` each
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
            max_entries,
            metrics: CacheMetrics::default(),
        }
    }

    /// Live record for a key
    pub fn get(&self, tenant_id: &str, key: &str, now: DateTime<Utc>) -> Option<IdempotencyRecord> {
        let cache_key = (tenant_id.to_string(), key.to_string());
        let found = self
            .entries
            .get(&cache_key)
            .filter(|entry| entry.evict_at > now && !entry.record.is_expired(now))
            .map(|entry| entry.record.clone());

        match found {
            Some(record) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(record)
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a completed record; skipped when full after a sweep
    pub fn put(&self, record: IdempotencyRecord, now: DateTime<Utc>) {
        if self.entries.len() >= self.max_entries {
            self.sweep(now);
            if self.entries.len() >= self.max_entries {
                debug!("Idempotency cache full, skipping insert");
                return;
            }
        }

        let evict_at = (now + self.ttl).min(record.expires_at);
        self.entries.insert(
            (record.tenant_id.clone(), record.key.clone()),
            CacheEntry { record, evict_at },
        );
        self.metrics.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a key
    pub fn remove(&self, tenant_id: &str, key: &str) {
        self.entries
            .remove(&(tenant_id.to_string(), key.to_string()));
    }

    /// Drop expired entries, returning how many were removed
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.evict_at > now);
        let evicted = before.saturating_sub(self.entries.len());
        self.metrics
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Entries held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counters
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}
