//! Settlement Router and Window Scheduler
//!
//! Moves captured cross-border transfers out through external rails.
//!
//! # Architecture
//!
//! - [`rails::RailCatalog`]: static fee/timing table, cheapest eligible rail wins
//! - [`router::SettlementRouter`]: route, settle with retries, fall back to
//!   alternative rails, finalize the ledger transfer
//! - [`scheduler::WindowScheduler`]: batched rails settle from a queue while
//!   the (tenant, rail) window is open
//! - [`adapters::RailAdapter`]: one integration per rail, fixed at startup
//! - [`events::EventSink`]: lifecycle events for webhook delivery
//!
//! # Example
//!
//! ```no_run
//! use settlement::{AdapterRegistry, FaultPlan, MemorySettlementStore, NoopEventSink};
//! use settlement::{RailCatalog, RouterConfig, SettlementRouter};
//! use ledger_core::{Config, Ledger, MemoryStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let ledger = Arc::new(Ledger::new(Arc::new(MemoryStore::new()), Config::default()));
//! let router = SettlementRouter::new(
//!     ledger,
//!     RailCatalog::default(),
//!     AdapterRegistry::simulated(Duration::from_millis(100), FaultPlan::default()),
//!     Arc::new(MemorySettlementStore::new()),
//!     Arc::new(NoopEventSink),
//!     RouterConfig::default(),
//! );
//! println!("{} rails", router.catalog().profiles().len());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod rails;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod window;

// Re-exports
pub use adapters::{AdapterRegistry, FaultPlan, RailAdapter, SimulatedRailAdapter};
pub use config::{Config, RouterConfig, SchedulerConfig, SimulationConfig};
pub use error::{Error, RailError, Result};
pub use events::{EventSink, MemoryEventSink, NoopEventSink, SettlementEvent, SettlementEventKind};
pub use rails::RailCatalog;
pub use retry::{RetryConfig, RetryStrategy};
pub use router::SettlementRouter;
pub use scheduler::{CycleReport, WindowScheduler};
pub use store::{MemorySettlementStore, SettlementStore};
pub use types::*;
pub use window::{HolidayCalendar, SettlementWindowConfig, StaticHolidayCalendar, WindowManager};
