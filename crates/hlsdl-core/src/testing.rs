//! In-memory fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::transport::{ByteTransport, Fetched, TransportError};

pub(crate) const MASTER_URL: &str = "http://cdn.test/master.m3u8";

#[derive(Default)]
struct Route {
    body: Vec<u8>,
    /// Respond 500 this many times before serving `body`.
    failures_left: usize,
    /// Never answer; wait for cancellation.
    hang: bool,
}

/// Routes URLs to canned responses and counts requests. Unknown URLs get 404.
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route {
                body: body.into(),
                ..Route::default()
            },
        );
    }

    pub fn fail_times(&self, url: &str, n: usize) {
        if let Some(r) = self.routes.lock().unwrap().get_mut(url) {
            r.failures_left = n;
        }
    }

    pub fn hang(&self, url: &str, hang: bool) {
        if let Some(r) = self.routes.lock().unwrap().get_mut(url) {
            r.hang = hang;
        }
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ByteTransport for FakeTransport {
    async fn fetch(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<Fetched, TransportError> {
        if token.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let response = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(url) {
                None => Some((404, Vec::new())),
                Some(r) if r.hang => None,
                Some(r) if r.failures_left > 0 => {
                    r.failures_left -= 1;
                    Some((500, Vec::new()))
                }
                Some(r) => Some((200, r.body.clone())),
            }
        };
        match response {
            Some((status, body)) => Ok(Fetched { status, body }),
            None => {
                token.cancelled().await;
                Err(TransportError::Cancelled)
            }
        }
    }
}

pub(crate) fn segment_url(index: usize) -> String {
    format!("http://cdn.test/hi/seg-{index}.ts")
}

pub(crate) fn segment_body(index: usize) -> Vec<u8> {
    format!("<segment {index}>").into_bytes()
}

pub(crate) fn media_playlist(segments: usize) -> String {
    let mut text = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for i in 0..segments {
        text.push_str(&format!("#EXTINF:4.0,\nseg-{i}.ts\n"));
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

/// Master with a 360p and a 1080p rendition; only the 1080p one is served.
pub(crate) fn hls_fixture(segments: usize) -> Arc<FakeTransport> {
    let t = FakeTransport::new();
    t.serve(
        MASTER_URL,
        "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
lo/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
hi/index.m3u8
",
    );
    t.serve("http://cdn.test/hi/index.m3u8", media_playlist(segments));
    for i in 0..segments {
        t.serve(&segment_url(i), segment_body(i));
    }
    t
}

/// Bytes a complete assembly of `hls_fixture(segments)` must produce.
pub(crate) fn expected_output(segments: usize) -> Vec<u8> {
    (0..segments).flat_map(segment_body).collect()
}

/// Collects chunks in memory; optionally reports cancellation after N chunks.
#[derive(Default)]
pub(crate) struct MemorySink {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
    pub chunks: usize,
    pub finished: bool,
    pub aborted: bool,
    pub cancel_at_begin: bool,
    pub cancel_after_chunks: Option<usize>,
}

#[async_trait]
impl crate::assembler::DestinationSink for MemorySink {
    async fn begin(&mut self, filename: &str) -> Result<(), crate::assembler::SinkError> {
        if self.cancel_at_begin {
            return Err(crate::assembler::SinkError::Cancelled);
        }
        self.filename = Some(filename.to_string());
        Ok(())
    }

    async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), crate::assembler::SinkError> {
        if self.cancel_after_chunks == Some(self.chunks) {
            return Err(crate::assembler::SinkError::Cancelled);
        }
        self.bytes.extend_from_slice(bytes);
        self.chunks += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), crate::assembler::SinkError> {
        self.finished = true;
        Ok(())
    }

    async fn abort(&mut self) {
        self.aborted = true;
        self.bytes.clear();
    }
}
