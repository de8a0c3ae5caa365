//! Single-segment GET with retry and backoff.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::retry::{run_with_retry, AttemptError, RetryError, RetryPolicy};
use crate::transport::{ByteTransport, TransportError};

/// Why one attempt at a segment failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("HTTP {0}")]
    Http(u32),
    #[error(transparent)]
    Transport(TransportError),
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Cancelled before or during a fetch or backoff wait. Not a failure.
    #[error("segment fetch cancelled")]
    Cancelled,
    #[error("failed to download {url} after {attempts} attempt(s): {source}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: FetchFailure,
    },
}

/// Downloads segment bodies, absorbing transient failures up to the policy's
/// retry budget.
#[derive(Clone)]
pub struct SegmentFetcher {
    transport: Arc<dyn ByteTransport>,
    policy: RetryPolicy,
}

impl SegmentFetcher {
    pub fn new(transport: Arc<dyn ByteTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url`; any transport error or non-2xx status is retried.
    pub async fn fetch_segment(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, SegmentError> {
        let transport = &self.transport;
        let res = run_with_retry(&self.policy, token, |attempt| async move {
            tracing::trace!(url, attempt, "fetching segment");
            match transport.fetch(url, token).await {
                Ok(fetched) if fetched.is_success() => Ok(fetched.body),
                Ok(fetched) => Err(AttemptError::Failed(FetchFailure::Http(fetched.status))),
                Err(TransportError::Cancelled) => Err(AttemptError::Cancelled),
                Err(e) => Err(AttemptError::Failed(FetchFailure::Transport(e))),
            }
        })
        .await;

        res.map_err(|e| match e {
            RetryError::Cancelled => SegmentError::Cancelled,
            RetryError::Exhausted { attempts, last } => SegmentError::Exhausted {
                url: url.to_string(),
                attempts,
                source: last,
            },
        })
    }
}
