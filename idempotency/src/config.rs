//! Idempotency configuration

use serde::{Deserialize, Serialize};

use crate::error::{IdempotencyError, Result};

/// Cache TTL defaults (in seconds)
pub mod ttl {
    /// In-process cache
    pub const HOT_CACHE: u64 = 300; // 5 minutes
    /// Completed durable record
    pub const DURABLE_RECORD: u64 = 86_400; // 24 hours
    /// Reservation held while the operation runs
    pub const PENDING_RESERVATION: u64 = 600; // 10 minutes
    /// Background sweep
    pub const SWEEP_INTERVAL: u64 = 300; // 5 minutes
}

/// Idempotency options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// When false every lookup is a miss and nothing is recorded
    pub enabled: bool,

    /// In-process cache TTL
    pub cache_ttl_secs: u64,

    /// Durable record TTL
    pub record_ttl_secs: u64,

    /// A reservation older than this is treated as abandoned
    pub pending_ttl_secs: u64,

    /// Interval of the background sweep
    pub sweep_interval_secs: u64,

    /// Upper bound for hot cache entries
    pub max_cache_entries: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_secs: ttl::HOT_CACHE,
            record_ttl_secs: ttl::DURABLE_RECORD,
            pending_ttl_secs: ttl::PENDING_RESERVATION,
            sweep_interval_secs: ttl::SWEEP_INTERVAL,
            max_cache_entries: 10_000,
        }
    }
}

impl IdempotencyConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IdempotencyConfig = toml::from_str(&content)
            .map_err(|e| IdempotencyError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject TTLs the service cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 || self.record_ttl_secs == 0 || self.pending_ttl_secs == 0 {
            return Err(IdempotencyError::Config(
                "TTL values must be greater than zero".to_string(),
            ));
        }
        if self.cache_ttl_secs > self.record_ttl_secs {
            return Err(IdempotencyError::Config(
                "cache_ttl_secs cannot exceed record_ttl_secs".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(IdempotencyError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
