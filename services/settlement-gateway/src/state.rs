//! Component wiring shared by the server and its background workers

use crate::config::{Config, FxConfig};
use crate::events::WebhookEventSink;
use idempotency::{IdempotencyService, MemoryIdempotencyStore};
use ledger_core::{Ledger, MemoryStore};
use settlement::{
    AdapterRegistry, MemorySettlementStore, RailCatalog, SettlementRouter, StaticHolidayCalendar, WindowManager,
    WindowScheduler,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use webhooks::{MemoryWebhookStore, WebhookService, WebhookTransport};

/// Handles to every component, cloned into each actix worker
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub idempotency: Arc<IdempotencyService>,
    pub router: Arc<SettlementRouter>,
    pub scheduler: Arc<WindowScheduler>,
    pub webhooks: Arc<WebhookService>,
    pub fx: FxConfig,
    pub started_at: Instant,
}

impl AppState {
    /// Build stores, ledger, idempotency, webhooks, router and scheduler
    pub fn build(config: &Config, transport: Arc<dyn WebhookTransport>) -> Self {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryStore::new()), config.ledger.clone()));

        let idempotency = Arc::new(IdempotencyService::new(
            Arc::new(MemoryIdempotencyStore::new()),
            config.idempotency.clone(),
        ));

        let webhooks = Arc::new(WebhookService::new(
            Arc::new(MemoryWebhookStore::new()),
            transport,
            config.webhooks.clone(),
        ));

        let simulation = &config.settlement.simulation;
        let adapters = AdapterRegistry::simulated(
            Duration::from_millis(simulation.latency_ms),
            simulation.fault_plan.clone(),
        );
        info!(rails = ?adapters.rails(), "Rail adapters registered");

        let router = Arc::new(SettlementRouter::new(
            ledger.clone(),
            RailCatalog::default(),
            adapters,
            Arc::new(MemorySettlementStore::new()),
            Arc::new(WebhookEventSink::new(webhooks.clone())),
            config.settlement.router.clone(),
        ));

        let windows = Arc::new(WindowManager::new(Arc::new(StaticHolidayCalendar::new())));
        let scheduler = Arc::new(WindowScheduler::new(
            router.clone(),
            windows,
            config.settlement.scheduler.clone(),
        ));

        Self {
            ledger,
            idempotency,
            router,
            scheduler,
            webhooks,
            fx: config.fx.clone(),
            started_at: Instant::now(),
        }
    }

    /// Spawn the idempotency sweeper, window scheduler and webhook worker
    pub fn spawn_workers(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.idempotency.clone().run_sweeper(shutdown.clone())),
            tokio::spawn(self.scheduler.clone().run(shutdown.clone())),
            tokio::spawn(self.webhooks.worker().run(shutdown.clone())),
        ]
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("fx", &self.fx)
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}
