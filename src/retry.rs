//! Bounded, fixed-delay retry for operations with a known transient failure class.
//!
//! The loop knows nothing about registries: callers pass a predicate that
//! decides which errors are worth another attempt.

use crate::constants::{PUBLISH_MAX_ATTEMPTS, PUBLISH_RETRY_DELAY_MS};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry configuration for resilient operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(
            PUBLISH_MAX_ATTEMPTS,
            Duration::from_millis(PUBLISH_RETRY_DELAY_MS),
        )
    }
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects,
/// or the attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !is_retryable(&err) {
                    return Err(err);
                }
                tracing::debug!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
