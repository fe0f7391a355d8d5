//! Records, lookup outcomes and request identity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response captured for replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw body bytes
    pub body: Vec<u8>,
    /// Response headers worth replaying (content type etc.)
    pub headers: Vec<(String, String)>,
}

impl CachedResponse {
    /// JSON response with its content type
    pub fn json(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            body,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
        }
    }

    /// Transient failures are not cached so the client may retry
    pub fn is_cacheable(&self) -> bool {
        self.status < 500
    }
}

/// Lifecycle of a durable record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Reserved; the operation is running
    Pending,
    /// Response recorded
    Completed,
}

/// Durable record, keyed by `(tenant_id, key)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Owning tenant
    pub tenant_id: String,
    /// Client key
    pub key: String,
    /// Fingerprint of the first request seen with this key
    pub request_hash: String,
    /// Method of that request
    pub method: String,
    /// Path of that request
    pub path: String,
    /// Reserved or completed
    pub state: RecordState,
    /// Recorded response, once completed
    pub response: Option<CachedResponse>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry; an expired pending record counts as abandoned
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Whether the record is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Request identity used for lookups
#[derive(Debug, Clone)]
pub struct RequestKey<'a> {
    /// Tenant scope
    pub tenant_id: &'a str,
    /// Client key
    pub key: &'a str,
    /// HTTP method
    pub method: &'a str,
    /// Request path
    pub path: &'a str,
    /// Request fingerprint
    pub request_hash: &'a str,
}

/// Outcome of [`crate::IdempotencyService::check_or_reserve`]
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult {
    /// Same key, same fingerprint, response recorded: replay it
    Hit(CachedResponse),
    /// Same key, different fingerprint
    Conflict {
        /// Method the key was first used with
        original_method: String,
        /// Path the key was first used with
        original_path: String,
    },
    /// Same key and fingerprint, still executing elsewhere
    InProgress,
    /// Unknown key; it is now reserved for the caller
    Miss,
}

/// Result of an atomic insert-if-absent
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// Reservation written
    Inserted,
    /// A live record already holds the key
    Existing(IdempotencyRecord),
}

/// What one sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Hot cache entries dropped
    pub cache_evicted: usize,
    /// Durable records deleted
    pub records_purged: usize,
}
