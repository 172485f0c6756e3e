//! Bounded retry with exponential backoff for calls to external
//! collaborators (metrics backend, container runtime).

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::RetryConfig;

/// Run `op` until it succeeds or `policy.attempts` calls have failed.
///
/// The delay starts at `policy.base_backoff` and doubles after every
/// failure, capped at `policy.max_backoff`. The last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryConfig, what: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_when(policy, what, |_| true, op).await
}

/// Like `retry_with_backoff`, but an error for which `retryable` returns
/// false is returned at once.
pub async fn retry_with_backoff_when<T, E, F, Fut, P>(
    policy: &RetryConfig,
    what: &str,
    retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts || !retryable(&e) => return Err(e),
            Err(e) => {
                let backoff = backoff_for_attempt(policy, attempt);
                debug!(
                    operation = what,
                    attempt,
                    attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "retrying after failure"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Sleep after failed attempt `n` (1-based).
pub fn backoff_for_attempt(policy: &RetryConfig, n: u32) -> Duration {
    let mut backoff = policy.base_backoff;
    for _ in 1..n {
        backoff = (backoff * 2).min(policy.max_backoff);
    }
    backoff
}

/// Worst-case duration of a retried call whose every attempt is cut off
/// at `per_attempt`: all attempts plus the sleeps between them.
pub fn retry_budget(policy: &RetryConfig, per_attempt: Duration) -> Duration {
    let attempts = policy.attempts.max(1);
    (1..attempts).fold(per_attempt * attempts, |total, n| {
        total + backoff_for_attempt(policy, n)
    })
}
