//! Retry and backoff policy.
//!
//! Exponential backoff decisions and a cancellation-aware retry loop shared by
//! the segment fetcher. Every failed attempt is retried until the budget runs
//! out; cancellation ends the loop immediately, including a backoff wait in
//! progress.

mod policy;
mod run;

pub use policy::{RetryDecision, RetryPolicy};
pub use run::{run_with_retry, AttemptError, RetryError};
