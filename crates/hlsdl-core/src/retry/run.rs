//! Retry loop: run an async attempt until success, cancellation, or the policy says stop.

use std::fmt;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::policy::{RetryDecision, RetryPolicy};

/// Failure of a single attempt.
#[derive(Debug)]
pub enum AttemptError<E> {
    /// The attempt observed cancellation; never retried.
    Cancelled,
    /// The attempt failed and may be retried.
    Failed(E),
}

/// Final failure of the retry loop.
#[derive(Debug)]
pub enum RetryError<E> {
    Cancelled,
    /// Every allowed attempt failed; `last` is the error of the final one.
    Exhausted { attempts: u32, last: E },
}

/// Runs `f` until it succeeds or the retry policy says to stop.
///
/// `f` receives the 0-based attempt number. Cancellation is checked before
/// every attempt and before every backoff wait, and interrupts a wait that is
/// already sleeping.
pub async fn run_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
    E: fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        let err = match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Cancelled) => return Err(RetryError::Cancelled),
            Err(AttemptError::Failed(e)) => e,
        };
        match policy.decide(attempt) {
            RetryDecision::NoRetry => {
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last: err,
                })
            }
            RetryDecision::RetryAfter(delay) => {
                if token.is_cancelled() {
                    return Err(RetryError::Cancelled);
                }
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failed attempt"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
