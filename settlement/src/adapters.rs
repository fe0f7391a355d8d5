//! Rail adapters
//!
//! One adapter per rail, resolved from a registry built at startup. The
//! simulated adapter replaces real provider integrations outside production
//! and takes an explicit [`FaultPlan`] so failure behaviour is a choice of
//! the caller, never ambient randomness.

use crate::error::{Error, RailError, Result};
use crate::types::{Rail, Recipient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{Currency, TransferId};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// What the adapter is asked to pay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterRequest {
    /// Transfer (used as the provider idempotency reference)
    pub transfer_id: TransferId,
    /// Amount
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Beneficiary
    pub recipient: Option<Recipient>,
}

/// Provider acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterReceipt {
    /// Provider reference
    pub provider_reference: String,
    /// Acceptance time
    pub accepted_at: DateTime<Utc>,
}

/// Integration with one external rail
#[async_trait]
pub trait RailAdapter: Send + Sync {
    /// Rail served
    fn rail(&self) -> Rail;

    /// Submit a payment
    async fn settle(&self, request: &AdapterRequest) -> std::result::Result<AdapterReceipt, RailError>;
}

/// Failure behaviour of the simulated adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FaultPlan {
    /// Every call succeeds
    Never,
    /// Every call fails
    Always {
        /// Whether failures are retryable
        retryable: bool,
    },
    /// The first `n` calls fail, later calls succeed
    FirstN {
        /// Failing calls
        n: u32,
        /// Whether failures are retryable
        retryable: bool,
    },
    /// Calls succeed with probability `success_rate` (seeded, retryable failures)
    Rate {
        /// Probability of success in 0..=1
        success_rate: f64,
        /// RNG seed
        seed: u64,
    },
}

impl Default for FaultPlan {
    fn default() -> Self {
        FaultPlan::Rate {
            success_rate: 0.95,
            seed: 42,
        }
    }
}

/// Adapter that simulates a provider
pub struct SimulatedRailAdapter {
    rail: Rail,
    latency: Duration,
    plan: FaultPlan,
    calls: AtomicU32,
    rng: Mutex<StdRng>,
}

impl SimulatedRailAdapter {
    /// Create a simulated adapter
    pub fn new(rail: Rail, latency: Duration, plan: FaultPlan) -> Self {
        let seed = match &plan {
            FaultPlan::Rate { seed, .. } => *seed,
            _ => 0,
        };
        Self {
            rail,
            latency,
            plan,
            calls: AtomicU32::new(0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Calls received so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn outcome(&self, call: u32) -> Option<bool> {
        match &self.plan {
            FaultPlan::Never => None,
            FaultPlan::Always { retryable } => Some(*retryable),
            FaultPlan::FirstN { n, retryable } => (call <= *n).then_some(*retryable),
            FaultPlan::Rate { success_rate, .. } => {
                let roll: f64 = self.rng.lock().gen();
                (roll >= *success_rate).then_some(true)
            }
        }
    }

    fn reference(&self) -> String {
        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        match self.rail {
            Rail::Pix => format!("E2E{}", &id[..24]),
            Rail::Spei => format!("SPEI{}", &id[..20]),
            Rail::Usdc => format!("0x{}", Uuid::new_v4().simple()),
            other => format!("{}-{}", other.as_str().to_uppercase(), &id[..16]),
        }
    }
}

#[async_trait]
impl RailAdapter for SimulatedRailAdapter {
    fn rail(&self) -> Rail {
        self.rail
    }

    async fn settle(&self, request: &AdapterRequest) -> std::result::Result<AdapterReceipt, RailError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(retryable) = self.outcome(call) {
            warn!(
                rail = %self.rail,
                transfer_id = %request.transfer_id,
                call,
                "Simulated rail failure"
            );
            return Err(RailError {
                rail: self.rail,
                message: "Simulated provider failure".to_string(),
                retryable,
            });
        }

        let receipt = AdapterReceipt {
            provider_reference: self.reference(),
            accepted_at: Utc::now(),
        };
        info!(
            rail = %self.rail,
            transfer_id = %request.transfer_id,
            amount = %request.amount,
            currency = %request.currency,
            reference = %receipt.provider_reference,
            "Simulated rail accepted payment"
        );
        Ok(receipt)
    }
}

/// Adapter per rail, fixed at startup
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<Rail, Arc<dyn RailAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated adapters for every rail
    pub fn simulated(latency: Duration, plan: FaultPlan) -> Self {
        let mut registry = Self::new();
        for rail in Rail::ALL {
            registry.register(Arc::new(SimulatedRailAdapter::new(rail, latency, plan.clone())));
        }
        registry
    }

    /// Register (or replace) the adapter for its rail
    pub fn register(&mut self, adapter: Arc<dyn RailAdapter>) -> &mut Self {
        self.adapters.insert(adapter.rail(), adapter);
        self
    }

    /// Adapter for a rail
    pub fn get(&self, rail: Rail) -> Result<Arc<dyn RailAdapter>> {
        self.adapters
            .get(&rail)
            .cloned()
            .ok_or(Error::AdapterMissing(rail))
    }

    /// Registered rails
    pub fn rails(&self) -> Vec<Rail> {
        let mut rails: Vec<Rail> = self.adapters.keys().copied().collect();
        rails.sort();
        rails
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("rails", &self.rails())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> AdapterRequest {
        AdapterRequest {
            transfer_id: TransferId::new(),
            amount: dec!(10),
            currency: Currency::BRL,
            recipient: None,
        }
    }

    #[tokio::test]
    async fn test_first_n_then_success() {
        let adapter = SimulatedRailAdapter::new(
            Rail::Pix,
            Duration::ZERO,
            FaultPlan::FirstN { n: 2, retryable: true },
        );
        assert!(adapter.settle(&request()).await.unwrap_err().retryable);
        assert!(adapter.settle(&request()).await.is_err());
        let receipt = adapter.settle(&request()).await.unwrap();
        assert!(receipt.provider_reference.starts_with("E2E"));
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test]
    async fn test_always_terminal() {
        let adapter = SimulatedRailAdapter::new(
            Rail::Ach,
            Duration::ZERO,
            FaultPlan::Always { retryable: false },
        );
        let err = adapter.settle(&request()).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(err.rail, Rail::Ach);
    }

    #[tokio::test]
    async fn test_rate_is_deterministic_for_a_seed() {
        let plan = FaultPlan::Rate { success_rate: 0.5, seed: 7 };
        let a = SimulatedRailAdapter::new(Rail::Wire, Duration::ZERO, plan.clone());
        let b = SimulatedRailAdapter::new(Rail::Wire, Duration::ZERO, plan);

        let mut outcomes_a = Vec::new();
        let mut outcomes_b = Vec::new();
        for _ in 0..20 {
            outcomes_a.push(a.settle(&request()).await.is_ok());
            outcomes_b.push(b.settle(&request()).await.is_ok());
        }
        assert_eq!(outcomes_a, outcomes_b);
    }

    #[test]
    fn test_registry_missing_rail() {
        let registry = AdapterRegistry::new();
        assert!(matches!(registry.get(Rail::Pix), Err(Error::AdapterMissing(Rail::Pix))));

        let registry = AdapterRegistry::simulated(Duration::ZERO, FaultPlan::Never);
        assert_eq!(registry.rails().len(), Rail::ALL.len());
    }

    #[test]
    fn test_fault_plan_json() {
        let plan: FaultPlan = serde_json::from_str(r#"{"mode":"first_n","n":1,"retryable":true}"#).unwrap();
        assert_eq!(plan, FaultPlan::FirstN { n: 1, retryable: true });
    }
}
