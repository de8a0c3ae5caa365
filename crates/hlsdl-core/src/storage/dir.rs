//! Directory-backed staging under the XDG cache dir.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::{BlobStaging, StagingProvider};

/// Suffix for blobs still being written; never listed.
const TEMP_SUFFIX: &str = ".part";

/// One directory per source, named by a hash of the source URL.
#[derive(Debug, Clone)]
pub struct DirStagingRoot {
    root: PathBuf,
}

impl DirStagingRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.cache/hlsdl/staging` on Debian.
    pub fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("hlsdl")?;
        Ok(Self::new(xdg_dirs.get_cache_home().join("hlsdl").join("staging")))
    }

    pub fn dir_for(&self, source_url: &str) -> PathBuf {
        let digest = Sha256::digest(source_url.as_bytes());
        self.root.join(&hex::encode(digest)[..16])
    }
}

impl StagingProvider for DirStagingRoot {
    fn staging_for(&self, source_url: &str) -> Arc<dyn BlobStaging> {
        Arc::new(DirStaging::new(self.dir_for(source_url)))
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DirStaging {
    dir: PathBuf,
}

impl DirStaging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> io::Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.ends_with(TEMP_SUFFIX) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid staging key: {key:?}"),
            ));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl BlobStaging for DirStaging {
    /// Durable once this returns: data is synced before the rename, and the
    /// directory entry after it.
    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(TEMP_SUFFIX);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        sync_dir(&self.dir).await
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(TEMP_SUFFIX) {
                    keys.push(name.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn read(&self, key: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path(key)?).await
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.path(key)?).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
