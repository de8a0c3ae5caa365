//! Byte transport: "fetch the bytes at this URL", with mid-flight cancellation.
//!
//! The engine only talks to [`ByteTransport`]; [`CurlTransport`] is the
//! libcurl-backed implementation used by the CLI.

mod http;

pub use http::CurlTransport;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Response of a completed transfer. Any status is returned as-is; callers
/// decide what counts as success.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status: u32,
    pub body: Vec<u8>,
}

impl Fetched {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The token fired before or during the transfer.
    #[error("transfer cancelled")]
    Cancelled,
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// The blocking transfer task panicked or was shut down.
    #[error("transfer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait ByteTransport: Send + Sync {
    /// Fetch `url`. Must return `TransportError::Cancelled` promptly once
    /// `token` fires, releasing the underlying connection.
    async fn fetch(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<Fetched, TransportError>;
}
