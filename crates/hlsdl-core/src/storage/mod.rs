//! Staging area for downloaded segment blobs.
//!
//! Each source URL gets its own [`BlobStaging`]; blobs are keyed
//! `segment-<index>.ts`. Downloading only adds blobs, assembly drains them.

mod dir;
mod memory;

pub use dir::{DirStaging, DirStagingRoot};
pub use memory::{MemoryStaging, MemoryStagingRoot};

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

const SEGMENT_PREFIX: &str = "segment-";

/// Staging key for the segment at `index`.
pub fn segment_key(index: usize) -> String {
    format!("{SEGMENT_PREFIX}{index}.ts")
}

/// Index embedded in a staging key (`segment-12.ts` → 12). Keys that do not
/// name a segment yield `None`.
pub fn parse_segment_index(key: &str) -> Option<usize> {
    let rest = key.strip_prefix(SEGMENT_PREFIX)?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..digits_end].parse().ok()
}

/// Blob storage for one source.
#[async_trait]
pub trait BlobStaging: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous blob. The blob is
    /// only listed once fully written.
    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
    /// Keys currently staged, in insertion order where the backend knows it.
    async fn list(&self) -> io::Result<Vec<String>>;
    async fn read(&self, key: &str) -> io::Result<Vec<u8>>;
    async fn remove(&self, key: &str) -> io::Result<()>;
    /// Drop every blob. Clearing an empty or missing area succeeds.
    async fn clear(&self) -> io::Result<()>;
}

/// Hands out the staging area belonging to a source URL.
pub trait StagingProvider: Send + Sync {
    fn staging_for(&self, source_url: &str) -> Arc<dyn BlobStaging>;
}
