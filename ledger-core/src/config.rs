//! Configuration for the ledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Maximum time to wait for both account locks (milliseconds)
    pub lock_timeout_ms: u64,

    /// Upper bound for a single movement, if any
    pub max_transfer_amount: Option<Decimal>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "ledger-core".to_string(),
            lock_timeout_ms: 5_000,
            max_transfer_amount: None,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(max) = self.max_transfer_amount {
            if max <= Decimal::ZERO {
                return Err(crate::Error::Config(
                    "max_transfer_amount must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "ledger-core");
        assert_eq!(config.lock_timeout_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str("lock_timeout_ms = 250").unwrap();
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.service_name, "ledger-core");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = Config {
            lock_timeout_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
