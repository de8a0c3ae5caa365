//! Destination for the assembled output.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The user cancelled the write.
    #[error("write cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A write target that takes a filename hint and a stream of chunks.
///
/// Nothing is visible under the final name until `finish` succeeds; `abort`
/// discards whatever was written.
#[async_trait]
pub trait DestinationSink: Send {
    async fn begin(&mut self, filename: &str) -> Result<(), SinkError>;
    async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), SinkError>;
    async fn finish(&mut self) -> Result<(), SinkError>;
    async fn abort(&mut self);
}

struct OpenFile {
    file: tokio::fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
}

/// Writes into `dir/<filename>` through a `.part` temp file renamed on finish.
pub struct FileDestination {
    dir: PathBuf,
    token: CancellationToken,
    open: Option<OpenFile>,
    written: Option<PathBuf>,
}

impl FileDestination {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_token(dir, CancellationToken::new())
    }

    /// Cancelling `token` makes the next `begin` or `write_chunk` fail with
    /// [`SinkError::Cancelled`].
    pub fn with_token(dir: impl Into<PathBuf>, token: CancellationToken) -> Self {
        Self {
            dir: dir.into(),
            token,
            open: None,
            written: None,
        }
    }

    /// Final path of the finished file, once `finish` has succeeded.
    pub fn written_path(&self) -> Option<&Path> {
        self.written.as_deref()
    }

    fn check_cancelled(&self) -> Result<(), SinkError> {
        if self.token.is_cancelled() {
            Err(SinkError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Keep only the last path component so a hint cannot escape `dir`.
fn sanitize_filename(hint: &str) -> io::Result<&str> {
    let name = hint.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid output filename: {hint:?}"),
        ));
    }
    Ok(name)
}

#[async_trait]
impl DestinationSink for FileDestination {
    async fn begin(&mut self, filename: &str) -> Result<(), SinkError> {
        self.check_cancelled()?;
        let name = sanitize_filename(filename)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let final_path = self.dir.join(name);
        let temp_path = self.dir.join(format!("{name}.part"));
        let file = tokio::fs::File::create(&temp_path).await?;
        tracing::debug!(path = %temp_path.display(), "opened output");
        self.open = Some(OpenFile {
            file,
            temp_path,
            final_path,
        });
        Ok(())
    }

    async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.check_cancelled()?;
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "output not opened"))?;
        open.file.write_all(bytes).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        let mut open = self
            .open
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "output not opened"))?;
        open.file.flush().await?;
        open.file.sync_all().await?;
        drop(open.file);
        if let Err(e) = tokio::fs::rename(&open.temp_path, &open.final_path).await {
            let _ = tokio::fs::remove_file(&open.temp_path).await;
            return Err(e.into());
        }
        self.written = Some(open.final_path);
        Ok(())
    }

    async fn abort(&mut self) {
        if let Some(open) = self.open.take() {
            drop(open.file);
            if let Err(e) = tokio::fs::remove_file(&open.temp_path).await {
                tracing::warn!(
                    path = %open.temp_path.display(),
                    "failed to remove partial output: {}",
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finish_renames_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileDestination::new(dir.path());
        sink.begin("out.ts").await.unwrap();
        sink.write_chunk(b"ab").await.unwrap();
        sink.write_chunk(b"cd").await.unwrap();
        assert!(dir.path().join("out.ts.part").exists());
        sink.finish().await.unwrap();

        let path = dir.path().join("out.ts");
        assert_eq!(sink.written_path(), Some(path.as_path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"abcd");
        assert!(!dir.path().join("out.ts.part").exists());
    }

    #[tokio::test]
    async fn cancelled_token_fails_write_and_abort_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let mut sink = FileDestination::with_token(dir.path(), token.clone());
        sink.begin("out.ts").await.unwrap();
        token.cancel();
        assert!(matches!(sink.write_chunk(b"x").await, Err(SinkError::Cancelled)));
        sink.abort().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn filename_hint_cannot_escape_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileDestination::new(dir.path().join("out"));
        sink.begin("../../etc/video.ts").await.unwrap();
        sink.finish().await.unwrap();
        assert!(dir.path().join("out/video.ts").exists());

        let mut sink = FileDestination::new(dir.path());
        assert!(matches!(sink.begin("a/..").await, Err(SinkError::Io(_))));
    }
}
