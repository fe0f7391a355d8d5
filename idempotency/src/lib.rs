//! Request deduplication for mutating API calls
//!
//! A client-supplied key is scoped to its tenant and bound to the
//! fingerprint of the first request that used it. Replays with the same
//! fingerprint get the recorded response back; a different fingerprint
//! under the same key is a conflict.
//!
//! Two tiers:
//! - [`cache::ResponseCache`]: in-process, ~5 minutes
//! - [`store::IdempotencyStore`]: durable, 24 hours
//!
//! # Example
//!
//! ```
//! use idempotency::{
//!     fingerprint, CachedResponse, IdempotencyConfig, IdempotencyService, LookupResult,
//!     MemoryIdempotencyStore, RequestKey,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = IdempotencyService::new(
//!         Arc::new(MemoryIdempotencyStore::new()),
//!         IdempotencyConfig::default(),
//!     );
//!     let hash = fingerprint("POST", "/transfers", br#"{"amount":"10"}"#);
//!     let request = RequestKey {
//!         tenant_id: "tenant-a",
//!         key: "key-1",
//!         method: "POST",
//!         path: "/transfers",
//!         request_hash: &hash,
//!     };
//!
//!     assert_eq!(service.check_or_reserve(&request).await, LookupResult::Miss);
//!     assert_eq!(service.check_or_reserve(&request).await, LookupResult::InProgress);
//!
//!     let response = CachedResponse::json(201, br#"{"id":"t-1"}"#.to_vec());
//!     service.store(&request, response.clone()).await;
//!     assert_eq!(service.check_or_reserve(&request).await, LookupResult::Hit(response));
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod service;
pub mod store;
pub mod types;

pub use config::IdempotencyConfig;
pub use error::{IdempotencyError, Result};
pub use fingerprint::{fingerprint, is_mutating};
pub use service::IdempotencyService;
pub use store::{IdempotencyStore, MemoryIdempotencyStore};
pub use types::{CachedResponse, IdempotencyRecord, LookupResult, RequestKey, SweepReport};

/// Header names accepted for the client key, in precedence order
pub const IDEMPOTENCY_KEY_HEADERS: [&str; 2] = ["Idempotency-Key", "X-Idempotency-Key"];

/// Header set on replayed responses
pub const REPLAYED_HEADER: &str = "Idempotent-Replayed";
