//! Bounded retries with capped exponential backoff for rail calls

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Delay cap
    pub max_delay_ms: u64,
    /// Growth factor per retry
    pub backoff_multiplier: f64,
    /// Fraction of the delay added or removed at random
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

/// Runs an operation until it succeeds, fails terminally, or runs out of retries
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    /// Create strategy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Strategy with default settings
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Total attempts, first one included
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }

    /// Delay before retry number `retry` (0-based)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let grown = self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(retry as i32);
        let capped = grown.min(self.config.max_delay_ms as f64);

        let spread = capped * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            (rand::random::<f64>() * 2.0 - 1.0) * spread
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Longest total backoff across all retries, jitter included
    pub fn max_total_delay(&self) -> Duration {
        let ms: f64 = (0..self.config.max_retries)
            .map(|retry| {
                let grown = self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(retry as i32);
                grown.min(self.config.max_delay_ms as f64) * (1.0 + self.config.jitter_factor)
            })
            .sum();
        Duration::from_millis(ms.ceil() as u64)
    }

    /// Execute `operation` with retries
    ///
    /// The closure receives the 1-based attempt number. Errors whose
    /// [`Error::is_retryable`] is false stop the loop immediately.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F, operation_name: &str) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts() {
            if attempt > 1 {
                let delay = self.calculate_delay(attempt - 2);
                debug!(
                    operation = operation_name,
                    retry = attempt - 1,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(operation = operation_name, attempt, "Succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(operation = operation_name, attempt, "Terminal failure: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts(),
                        "Retryable failure: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Validation(format!("{} was never attempted", operation_name))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RailError;
    use crate::types::Rail;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_backoff() {
        let strategy = RetryStrategy::new(RetryConfig {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        });

        assert_eq!(strategy.calculate_delay(0).as_millis(), 100);
        assert_eq!(strategy.calculate_delay(1).as_millis(), 200);
        assert_eq!(strategy.calculate_delay(2).as_millis(), 400);
    }

    #[test]
    fn test_max_delay_cap() {
        let strategy = RetryStrategy::new(RetryConfig {
            max_retries: 10,
            initial_delay_ms: 250,
            max_delay_ms: 3_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        });

        assert_eq!(strategy.calculate_delay(4).as_millis(), 3_000);
        assert_eq!(strategy.calculate_delay(10).as_millis(), 3_000);
    }

    #[test]
    fn test_max_total_delay_includes_jitter() {
        let strategy = RetryStrategy::with_defaults();
        // 500 + 1000 + 2000 ms, each stretched by 10%
        assert_eq!(strategy.max_total_delay().as_millis(), 3_850);
        assert!(RetryStrategy::new(RetryConfig::immediate(5)).max_total_delay().is_zero());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let strategy = RetryStrategy::new(RetryConfig::immediate(3));
        let calls = AtomicU32::new(0);

        let result = strategy
            .execute_with_retry(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(Error::Rail(RailError::retryable(Rail::Pix, "timeout")))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                "settle",
            )
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_stops_immediately() {
        let strategy = RetryStrategy::new(RetryConfig::immediate(3));
        let calls = AtomicU32::new(0);

        let result: Result<()> = strategy
            .execute_with_retry(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::Rail(RailError::terminal(Rail::Spei, "invalid CLABE"))) }
                },
                "settle",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let strategy = RetryStrategy::new(RetryConfig::immediate(2));

        let result: Result<()> = strategy
            .execute_with_retry(
                |attempt| async move {
                    Err(Error::Rail(RailError::retryable(Rail::Ach, format!("down {}", attempt))))
                },
                "settle",
            )
            .await;

        match result {
            Err(Error::Rail(e)) => assert_eq!(e.message, "down 3"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
