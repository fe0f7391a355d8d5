//! Configuration for webhook delivery

use serde::{Deserialize, Serialize};

/// Webhook worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Delivery polling interval
    pub poll_interval_secs: u64,

    /// Deliveries claimed per cycle
    pub batch_size: usize,

    /// Attempts before a delivery moves to the DLQ
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt
    pub backoff_base_secs: u64,

    /// Retry delay cap
    pub backoff_cap_secs: u64,

    /// Per-request timeout
    pub request_timeout_secs: u64,

    /// Age after which DLQ deliveries are purged
    pub dlq_retention_days: i64,

    /// Cleanup interval (default: daily)
    pub cleanup_interval_secs: u64,

    /// How long a rotated-out secret keeps signing
    pub secret_grace_period_hours: i64,

    /// User agent sent with deliveries
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            batch_size: 50,
            max_attempts: 5,
            backoff_base_secs: 30,
            backoff_cap_secs: 3600,
            request_timeout_secs: 10,
            dlq_retention_days: 7,
            cleanup_interval_secs: 86_400,
            secret_grace_period_hours: 24,
            user_agent: format!("settlement-webhooks/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl WebhookConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WebhookConfig = toml::from_str(&content)
            .map_err(|e| crate::WebhookError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the worker cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        let positive = [
            ("poll_interval_secs", self.poll_interval_secs),
            ("batch_size", self.batch_size as u64),
            ("max_attempts", self.max_attempts as u64),
            ("backoff_base_secs", self.backoff_base_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(crate::WebhookError::Config(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.backoff_cap_secs < self.backoff_base_secs {
            return Err(crate::WebhookError::Config(
                "backoff_cap_secs must be at least backoff_base_secs".to_string(),
            ));
        }
        if self.dlq_retention_days < 0 || self.secret_grace_period_hours < 0 {
            return Err(crate::WebhookError::Config(
                "Retention and grace periods cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}
