use idempotency::IdempotencyConfig;
use ledger_core::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settlement::RailCatalog;
use std::env;
use thiserror::Error;
use webhooks::WebhookConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: ledger_core::Config,
    pub idempotency: IdempotencyConfig,
    pub settlement: settlement::Config,
    pub webhooks: WebhookConfig,
    pub fx: FxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: 4,
        }
    }
}

/// One directed FX rate: 1 `from` = `rate` `to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
}

/// Configured rate table for cross-border transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FxConfig {
    pub rates: Vec<FxRate>,
}

impl Default for FxConfig {
    fn default() -> Self {
        let usd = |to, rate| FxRate {
            from: Currency::USD,
            to,
            rate,
        };
        Self {
            rates: vec![
                usd(Currency::BRL, Decimal::new(500, 2)),
                usd(Currency::MXN, Decimal::new(1700, 2)),
                usd(Currency::EUR, Decimal::new(92, 2)),
                usd(Currency::GBP, Decimal::new(79, 2)),
                usd(Currency::COP, Decimal::new(3900, 0)),
                usd(Currency::USDC, Decimal::ONE),
                FxRate {
                    from: Currency::EUR,
                    to: Currency::USD,
                    rate: Decimal::new(109, 2),
                },
            ],
        }
    }
}

impl FxConfig {
    /// Rate for a pair; same currency is always 1
    pub fn rate(&self, from: Currency, to: Currency) -> Option<Decimal> {
        if from == to {
            return Some(Decimal::ONE);
        }
        self.rates
            .iter()
            .find(|r| r.from == from && r.to == to)
            .map(|r| r.rate)
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Optional TOML file from `GATEWAY_CONFIG`, then environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match env::var("GATEWAY_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(host) = env::var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("SERVICE_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SERVICE_PORT is not a port: {}", port)))?;
        }
        if let Ok(workers) = env::var("SERVER_WORKERS") {
            config.server.workers = workers
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SERVER_WORKERS is not a number: {}", workers)))?;
        }
        if let Ok(enabled) = env::var("IDEMPOTENCY_ENABLED") {
            config.idempotency.enabled = enabled != "false";
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.workers == 0 {
            return Err(ConfigError::Invalid("server.workers must be greater than zero".to_string()));
        }
        self.ledger
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.idempotency
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.settlement
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        // A reservation must outlive the slowest request holding it, or a
        // client retry with the same key would run the transfer again
        let slowest = self
            .settlement
            .router
            .worst_case_execution(RailCatalog::default().max_instant_candidates());
        let slowest_secs = slowest.as_secs() + u64::from(slowest.subsec_nanos() > 0);
        if self.idempotency.enabled && self.idempotency.pending_ttl_secs < slowest_secs {
            return Err(ConfigError::Invalid(format!(
                "idempotency.pending_ttl_secs ({}) is shorter than the slowest settlement ({}s)",
                self.idempotency.pending_ttl_secs, slowest_secs
            )));
        }
        self.webhooks
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if let Some(bad) = self.fx.rates.iter().find(|r| r.rate <= Decimal::ZERO) {
            return Err(ConfigError::Invalid(format!(
                "FX rate {}->{} must be positive",
                bad.from, bad.to
            )));
        }
        Ok(())
    }
}
