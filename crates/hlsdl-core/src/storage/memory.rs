use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{BlobStaging, StagingProvider};

/// In-memory staging that remembers insertion order.
#[derive(Debug, Default)]
pub struct MemoryStaging {
    blobs: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryStaging {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, Vec<(String, Vec<u8>)>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn not_found(key: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no staged blob {key:?}"))
}

#[async_trait]
impl BlobStaging for MemoryStaging {
    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let mut blobs = self.blobs();
        match blobs.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = bytes.to_vec(),
            None => blobs.push((key.to_string(), bytes.to_vec())),
        }
        Ok(())
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.blobs().iter().map(|(k, _)| k.clone()).collect())
    }

    async fn read(&self, key: &str) -> io::Result<Vec<u8>> {
        self.blobs()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| not_found(key))
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        self.blobs().retain(|(k, _)| k != key);
        Ok(())
    }

    async fn clear(&self) -> io::Result<()> {
        self.blobs().clear();
        Ok(())
    }
}

/// One [`MemoryStaging`] per source URL, kept for the life of the root.
#[derive(Debug, Default)]
pub struct MemoryStagingRoot {
    areas: Mutex<HashMap<String, Arc<MemoryStaging>>>,
}

impl MemoryStagingRoot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle for inspection in tests.
    pub fn area(&self, source_url: &str) -> Arc<MemoryStaging> {
        let mut areas = self.areas.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(areas.entry(source_url.to_string()).or_default())
    }
}

impl StagingProvider for MemoryStagingRoot {
    fn staging_for(&self, source_url: &str) -> Arc<dyn BlobStaging> {
        self.area(source_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_keeps_insertion_order_and_rewrite_in_place() {
        let staging = MemoryStaging::new();
        staging.write("segment-10.ts", b"a").await.unwrap();
        staging.write("segment-2.ts", b"b").await.unwrap();
        staging.write("segment-10.ts", b"c").await.unwrap();
        assert_eq!(staging.list().await.unwrap(), ["segment-10.ts", "segment-2.ts"]);
        assert_eq!(staging.read("segment-10.ts").await.unwrap(), b"c");
        assert_eq!(
            staging.read("segment-9.ts").await.unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn root_returns_same_area_per_source() {
        let root = MemoryStagingRoot::new();
        let a = root.area("u1");
        let b = root.area("u1");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &root.area("u2")));
    }
}
