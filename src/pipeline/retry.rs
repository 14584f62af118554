//! Retry with exponential back-off and jitter for submission attempts.
//!
//! Only errors [`SubmitError::is_retriable`] says yes to are retried —
//! a 404 contact page does not become a 200 by asking again, but a timed-out
//! navigation often does.

use crate::error::SubmitError;
use std::future::Future;
use std::time::Duration;

/// Jitter added to each back-off delay, uniform in `[0, JITTER_MS)`.
const JITTER_MS: u64 = 500;

/// Retry schedule for one job.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base * 2^(n-1)` plus jitter.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry attempt `attempt` (1-based), jitter included.
    fn delay_for(&self, attempt: u32) -> Duration {
        let computed = self
            .base_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(16));
        let capped = computed.min(self.max_delay_ms);
        Duration::from_millis(capped + (rand::random::<u64>() % JITTER_MS))
    }
}

/// Runs `operation` with up to `policy.max_retries` additional attempts on
/// retriable errors. Non-retriable errors and exhausted retries return the
/// last error.
///
/// Back-off doubles per attempt and delays are non-decreasing as long as
/// `base_delay_ms >= JITTER_MS`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, SubmitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SubmitError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retriable() || attempt >= policy.max_retries {
                    return Err(err);
                }
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient submission error — retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
