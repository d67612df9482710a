//! Bounded exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use orbit_core::{config::RetryConfig, parse_duration};
use tracing::{error, warn};

use crate::driver::DriverError;

/// Retry ceiling and backoff for one provider operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Always at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound on a single attempt. An attempt that runs out is retryable.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: parse_duration(&config.initial_delay).unwrap_or(defaults.initial_delay),
            max_delay: parse_duration(&config.max_delay).unwrap_or(defaults.max_delay),
            attempt_timeout: parse_duration(&config.attempt_timeout)
                .unwrap_or(defaults.attempt_timeout),
            ..defaults
        }
    }

    /// The delay following `current`, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(
            (current.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
///
/// Only [`DriverError::Retryable`] is retried. Exhausting the ceiling turns
/// the last retryable error into a permanent one. Returns the outcome and
/// the number of attempts made.
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> (Result<T, DriverError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    let mut attempt = 0u32;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Retryable(format!(
                "attempt timed out after {:?}",
                policy.attempt_timeout
            ))),
        };

        match result {
            Ok(value) => return (Ok(value), attempt),
            Err(DriverError::Permanent(message)) => {
                error!(operation = %operation_name, attempt, error = %message, "operation failed permanently");
                return (Err(DriverError::Permanent(message)), attempt);
            }
            Err(DriverError::Retryable(message)) if attempt >= policy.max_attempts => {
                error!(operation = %operation_name, attempt, error = %message, "operation failed after max retries");
                return (
                    Err(DriverError::Permanent(format!(
                        "gave up after {attempt} attempts: {message}"
                    ))),
                    attempt,
                );
            }
            Err(DriverError::Retryable(message)) => {
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %message,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}
