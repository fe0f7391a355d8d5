//! HTTP gateway for the settlement core
//!
//! Wires the ledger, idempotency store, settlement router, window
//! scheduler and webhook worker behind one actix-web application.
//! Every mutating route goes through [`handlers::idempotent`], so a
//! retried request with the same `Idempotency-Key` gets the recorded
//! response instead of moving money twice.

pub mod config;
pub mod errors;
pub mod events;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod state;

pub use config::Config;
pub use errors::ApiError;
pub use state::AppState;
