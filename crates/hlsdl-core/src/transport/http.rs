//! libcurl transport. Each fetch runs one `Easy` handle on the blocking pool.

use std::time::Duration;

use async_trait::async_trait;
use curl::easy::Easy;
use tokio_util::sync::CancellationToken;

use super::{ByteTransport, Fetched, TransportError};
use crate::config::HttpConfig;

#[derive(Debug, Clone, Default)]
pub struct CurlTransport {
    http: HttpConfig,
}

impl CurlTransport {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ByteTransport for CurlTransport {
    async fn fetch(&self, url: &str, token: &CancellationToken) -> Result<Fetched, TransportError> {
        if token.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let url = url.to_string();
        let http = self.http.clone();
        let cancel = token.clone();
        let handle = tokio::task::spawn_blocking(move || fetch_blocking(&url, &http, &cancel));

        // The blocking transfer notices the token from its progress callback;
        // the caller is released right away.
        tokio::select! {
            res = handle => res?,
            _ = token.cancelled() => Err(TransportError::Cancelled),
        }
    }
}

/// GET `url` into memory. Runs in the current thread.
fn fetch_blocking(
    url: &str,
    http: &HttpConfig,
    cancel: &CancellationToken,
) -> Result<Fetched, TransportError> {
    let mut body = Vec::new();

    let mut easy = Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(http.connect_timeout_secs))?;
    // Low-speed timeout instead of a wall-clock one: slow links still finish.
    easy.low_speed_limit(http.low_speed_limit_bytes)?;
    easy.low_speed_time(Duration::from_secs(http.low_speed_time_secs))?;
    if let Some(ua) = &http.user_agent {
        easy.useragent(ua)?;
    }
    easy.progress(true)?;

    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        // Returning false aborts the transfer and closes the connection.
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        if let Err(e) = transfer.perform() {
            if e.is_aborted_by_callback() && cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            return Err(TransportError::Curl(e));
        }
    }

    let status = easy.response_code()?;
    tracing::trace!(url, status, bytes = body.len(), "transfer finished");
    Ok(Fetched { status, body })
}
