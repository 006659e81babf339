//! Bounded retry with exponential backoff
//!
//! Used for the initial connect and for reconnecting after a transient
//! transport failure. Errors that [`AiError::is_recoverable`] rejects stop the
//! loop immediately.

use crate::client::{AiConnector, AiStream};
use crate::config::AiSessionConfig;
use crate::error::{AiError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Retry bounds for connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AiError::config("retry.max_attempts must be at least 1"));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(AiError::config(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms",
            ));
        }
        Ok(())
    }

    /// Delay after failed attempt number `attempt` (1-based): doubles each time, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Run `operation` until it succeeds, fails with a non-recoverable error, or
/// the policy's attempts are exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(
            operation = operation_name,
            attempt,
            max_attempts = policy.max_attempts,
            "Attempting operation"
        );

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = delay.as_millis() as u64,
                    "Recoverable error, will retry"
                );
                sleep(delay).await;
            }
            Err(e) => {
                if attempt >= policy.max_attempts {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                } else {
                    error!(
                        operation = operation_name,
                        error = %e,
                        category = e.category(),
                        "Non-recoverable error, not retrying"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Open an AI stream, retrying transient connect failures per the session's policy
pub async fn connect_with_retry(
    connector: &dyn AiConnector,
    config: &AiSessionConfig,
) -> Result<AiStream> {
    retry_with_backoff("ai_connect", &config.ai.retry, |_| connector.open(config)).await
}
