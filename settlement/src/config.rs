//! Configuration for settlement routing and the window scheduler

use crate::adapters::FaultPlan;
use crate::retry::{RetryConfig, RetryStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Router settings
    pub router: RouterConfig,

    /// Window scheduler settings
    pub scheduler: SchedulerConfig,

    /// Simulated rail adapters
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement".to_string(),
            router: RouterConfig::default(),
            scheduler: SchedulerConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Backoff for retryable rail failures
    pub retry: RetryConfig,

    /// Timeout for one adapter call; expiry counts as a retryable failure
    pub attempt_timeout_secs: u64,

    /// Try the next alternative rail after retries on one rail run out
    pub reroute_on_retryable: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            attempt_timeout_secs: 30,
            reroute_on_retryable: true,
        }
    }
}

impl RouterConfig {
    /// Longest time one `execute` can spend on rails
    ///
    /// Every attempt times out and every backoff hits its jitter ceiling, on
    /// each of `instant_rails` candidates when rerouting is on.
    pub fn worst_case_execution(&self, instant_rails: usize) -> Duration {
        let strategy = RetryStrategy::new(self.retry.clone());
        let per_rail = Duration::from_secs(self.attempt_timeout_secs) * strategy.max_attempts()
            + strategy.max_total_delay();
        let rails = if self.reroute_on_retryable {
            instant_rails.max(1)
        } else {
            1
        };
        per_rail * rails as u32
    }
}

/// Window scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Polling interval (default: 5 minutes)
    pub poll_interval_secs: u64,

    /// Items claimed per (tenant, rail) per cycle
    pub max_batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            max_batch_size: 100,
        }
    }
}

/// Simulated adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Latency added to every call (milliseconds)
    pub latency_ms: u64,

    /// Failure behaviour
    pub fault_plan: FaultPlan,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_ms: 100,
            fault_plan: FaultPlan::default(),
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

    /// Reject values the router or scheduler cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.router.attempt_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "router.attempt_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.router.retry.backoff_multiplier < 1.0 {
            return Err(crate::Error::Config(
                "router.retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.router.retry.jitter_factor) {
            return Err(crate::Error::Config(
                "router.retry.jitter_factor must be within 0..=1".to_string(),
            ));
        }
        if self.scheduler.max_batch_size == 0 {
            return Err(crate::Error::Config(
                "scheduler.max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(crate::Error::Config(
                "scheduler.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if let FaultPlan::Rate { success_rate, .. } = self.simulation.fault_plan {
            if !(0.0..=1.0).contains(&success_rate) {
                return Err(crate::Error::Config(format!(
                    "simulation success_rate {} is outside 0..=1",
                    success_rate
                )));
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
        assert_eq!(config.router.retry.max_retries, 3);
        assert_eq!(config.router.attempt_timeout_secs, 30);
        assert_eq!(config.scheduler.poll_interval_secs, 300);
        assert_eq!(config.scheduler.max_batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worst_case_execution() {
        let config = RouterConfig::default();
        // 4 attempts x 30s + 3.85s of backoff
        assert_eq!(config.worst_case_execution(1).as_millis(), 123_850);
        assert_eq!(config.worst_case_execution(2).as_millis(), 247_700);

        let single = RouterConfig {
            reroute_on_retryable: false,
            ..RouterConfig::default()
        };
        assert_eq!(single.worst_case_execution(3).as_millis(), 123_850);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [scheduler]
            max_batch_size = 25

            [simulation.fault_plan]
            mode = "always"
            retryable = false
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_batch_size, 25);
        assert_eq!(config.scheduler.poll_interval_secs, 300);
        assert_eq!(config.simulation.fault_plan, FaultPlan::Always { retryable: false });
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.scheduler.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.fault_plan = FaultPlan::Rate { success_rate: 1.5, seed: 1 };
        assert!(config.validate().is_err());
    }
}
