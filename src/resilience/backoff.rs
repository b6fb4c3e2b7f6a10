//! Exponential backoff for broker reconnects.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::ReconnectConfig;
use crate::messaging::{BrokerError, BrokerResult};

/// Capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Retries allowed after the first failed attempt
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another retry is allowed after `attempt` retries
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out
    ///
    /// Only [`BrokerError::is_retryable`] failures are retried. Running out of
    /// retries yields [`BrokerError::ReconnectExhausted`] carrying the last error.
    pub async fn retry<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> BrokerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BrokerResult<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) if !self.allows_retry(retries) => {
                    if retries == 0 {
                        return Err(error);
                    }
                    return Err(BrokerError::reconnect_exhausted(
                        retries + 1,
                        error.to_string(),
                    ));
                }
                Err(error) => {
                    let delay = self.delay_for(retries);
                    retries += 1;
                    warn!(
                        operation = %operation,
                        retry = retries,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Broker operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}
