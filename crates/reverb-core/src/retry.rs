//! Bounded retry wrapper for single upstream calls.
//!
//! Wraps one network round-trip in an explicit loop carrying the attempt
//! index and a fixed delay table. Only transport failures, timeouts, and
//! 5xx-class responses are retried in place; a 404 is final for the app and
//! a 429 propagates immediately so the budget is not burned waiting out an
//! upstream rate limit. Cancellation is checked at loop entry and raced
//! against every delay, so a pending backoff aborts promptly.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Delay table for in-place retries.
///
/// Attempt `n` (0-based) sleeps `delays[n]` before re-trying, so the total
/// attempt budget is `delays.len() + 1`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_millis(500),
                Duration::from_millis(1500),
                Duration::from_millis(3000),
            ],
        }
    }
}

impl RetryPolicy {
    /// Creates a policy from an explicit delay table.
    ///
    /// The table must be non-decreasing; an empty table disables retries.
    pub fn new(delays: Vec<Duration>) -> Self {
        assert!(
            delays.windows(2).all(|w| w[0] <= w[1]),
            "retry delays must be non-decreasing"
        );
        Self { delays }
    }

    /// A policy that never retries, for tests and dry probes.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32 + 1
    }

    /// Delay before re-attempting after the given 0-based failed attempt.
    fn delay_after(&self, attempt: u32) -> Option<Duration> {
        self.delays.get(attempt as usize).copied()
    }
}

/// Runs `operation` under the retry policy.
///
/// The closure receives the 0-based attempt index and is called at most
/// [`RetryPolicy::max_attempts`] times. Exhausting the budget surfaces the
/// last error wrapped in [`AppError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, AppError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.max_attempts();

    for attempt in 0..max_attempts {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable_in_place() => return Err(err),
            Err(err) => {
                let Some(delay) = policy.delay_after(attempt) else {
                    return Err(AppError::RetriesExhausted {
                        attempts: max_attempts,
                        source: Box::new(err),
                    });
                };

                tracing::debug!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying upstream call"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                }
            }
        }
    }

    // The loop always returns from its final iteration.
    unreachable!("retry loop exited without a result")
}
