//! Idempotency service
//!
//! Lookup order: hot cache, then an atomic reserve in the durable store.
//! Durable store failures fail open: a failed reserve is reported as a miss
//! and a failed write is logged while the computed response is still
//! returned to the caller.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::IdempotencyConfig;
use crate::metrics::{IDEMPOTENCY_LOOKUPS_TOTAL, IDEMPOTENCY_STORE_ERRORS};
use crate::store::IdempotencyStore;
use crate::types::{
    CachedResponse, IdempotencyRecord, InsertOutcome, LookupResult, RecordState, RequestKey,
    SweepReport,
};

/// Deduplicates mutating requests across the hot cache and durable store
pub struct IdempotencyService {
    cache: ResponseCache,
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyService {
    /// Create service
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self {
            cache: ResponseCache::new(config.cache_ttl_secs, config.max_cache_entries),
            store,
            config,
        }
    }

    /// Service configuration
    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Hot cache
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Check a request against recorded keys, reserving the key on a miss
    pub async fn check_or_reserve(&self, request: &RequestKey<'_>) -> LookupResult {
        self.check_or_reserve_at(request, Utc::now()).await
    }

    /// [`IdempotencyService::check_or_reserve`] as of `now`
    pub async fn check_or_reserve_at(
        &self,
        request: &RequestKey<'_>,
        now: DateTime<Utc>,
    ) -> LookupResult {
        if !self.config.enabled {
            IDEMPOTENCY_LOOKUPS_TOTAL.with_label_values(&["disabled"]).inc();
            return LookupResult::Miss;
        }

        let result = self.lookup(request, now).await;
        let label = match &result {
            LookupResult::Hit(_) => "hit",
            LookupResult::Conflict { .. } => "conflict",
            LookupResult::InProgress => "in_progress",
            LookupResult::Miss => "miss",
        };
        IDEMPOTENCY_LOOKUPS_TOTAL.with_label_values(&[label]).inc();
        debug!(
            tenant_id = request.tenant_id,
            key = request.key,
            result = label,
            "Idempotency lookup"
        );
        result
    }

    async fn lookup(&self, request: &RequestKey<'_>, now: DateTime<Utc>) -> LookupResult {
        if let Some(record) = self.cache.get(request.tenant_id, request.key, now) {
            return self.evaluate(request, record, now);
        }

        let reservation = IdempotencyRecord {
            tenant_id: request.tenant_id.to_string(),
            key: request.key.to_string(),
            request_hash: request.request_hash.to_string(),
            method: request.method.to_string(),
            path: request.path.to_string(),
            state: RecordState::Pending,
            response: None,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.pending_ttl_secs as i64),
        };

        match self.store.insert_pending(reservation, now).await {
            Ok(InsertOutcome::Inserted) => LookupResult::Miss,
            Ok(InsertOutcome::Existing(record)) => self.evaluate(request, record, now),
            Err(e) => {
                IDEMPOTENCY_STORE_ERRORS.with_label_values(&["reserve"]).inc();
                warn!(
                    tenant_id = request.tenant_id,
                    key = request.key,
                    "Idempotency store unavailable, proceeding without dedup: {}",
                    e
                );
                LookupResult::Miss
            }
        }
    }

    fn evaluate(
        &self,
        request: &RequestKey<'_>,
        record: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> LookupResult {
        if record.request_hash != request.request_hash {
            return LookupResult::Conflict {
                original_method: record.method,
                original_path: record.path,
            };
        }

        match (record.state, record.response.clone()) {
            (RecordState::Completed, Some(response)) => {
                self.cache.put(record, now);
                LookupResult::Hit(response)
            }
            _ => LookupResult::InProgress,
        }
    }

    /// Record the response for a reserved key
    ///
    /// 5xx responses release the reservation instead, so the client can
    /// retry the same key.
    pub async fn store(&self, request: &RequestKey<'_>, response: CachedResponse) {
        self.store_at(request, response, Utc::now()).await
    }

    /// [`IdempotencyService::store`] as of `now`
    pub async fn store_at(
        &self,
        request: &RequestKey<'_>,
        response: CachedResponse,
        now: DateTime<Utc>,
    ) {
        if !self.config.enabled {
            return;
        }
        if !response.is_cacheable() {
            self.release(request.tenant_id, request.key).await;
            return;
        }

        let record = IdempotencyRecord {
            tenant_id: request.tenant_id.to_string(),
            key: request.key.to_string(),
            request_hash: request.request_hash.to_string(),
            method: request.method.to_string(),
            path: request.path.to_string(),
            state: RecordState::Completed,
            response: Some(response),
            created_at: now,
            expires_at: now + Duration::seconds(self.config.record_ttl_secs as i64),
        };

        self.cache.put(record.clone(), now);

        if let Err(e) = self.store.complete(record).await {
            IDEMPOTENCY_STORE_ERRORS.with_label_values(&["complete"]).inc();
            warn!(
                tenant_id = request.tenant_id,
                key = request.key,
                "Failed to persist idempotent response: {}",
                e
            );
        }
    }

    /// Drop a reservation (or record) so the key can be reused
    pub async fn release(&self, tenant_id: &str, key: &str) {
        self.cache.remove(tenant_id, key);
        if let Err(e) = self.store.remove(tenant_id, key).await {
            IDEMPOTENCY_STORE_ERRORS.with_label_values(&["release"]).inc();
            warn!(tenant_id, key, "Failed to release idempotency key: {}", e);
        }
    }

    /// Evict expired cache entries and purge expired durable records
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let cache_evicted = self.cache.sweep(now);
        let records_purged = match self.store.purge_expired(now).await {
            Ok(n) => n,
            Err(e) => {
                IDEMPOTENCY_STORE_ERRORS.with_label_values(&["purge"]).inc();
                warn!("Failed to purge expired idempotency records: {}", e);
                0
            }
        };
        SweepReport {
            cache_evicted,
            records_purged,
        }
    }

    /// Background sweep loop; exits when `shutdown` flips to true
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.sweep_interval_secs,
            "Starting idempotency sweeper"
        );
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.sweep_interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.sweep_at(Utc::now()).await;
                    if report.cache_evicted + report.records_purged > 0 {
                        debug!(
                            cache_evicted = report.cache_evicted,
                            records_purged = report.records_purged,
                            "Idempotency sweep"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Idempotency sweeper stopped");
    }
}
