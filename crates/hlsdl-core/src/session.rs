//! Public facade: start, abort and save one download at a time.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::assembler::{self, DestinationSink, SaveError, SaveReport};
use crate::control::{Activity, DownloadControl};
use crate::downloader::{DownloadError, DownloadOptions, DownloadState, Orchestrator, RunOutcome};
use crate::progress::{ProgressRecord, ProgressStore, StoreError};
use crate::storage::{BlobStaging, StagingProvider};
use crate::transport::ByteTransport;

/// A finished download whose segments are staged and ready to assemble.
#[derive(Clone)]
pub struct ReadyDownload {
    pub source_url: String,
    pub staging: Arc<dyn BlobStaging>,
    pub suggested_filename: String,
}

impl std::fmt::Debug for ReadyDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyDownload")
            .field("source_url", &self.source_url)
            .field("suggested_filename", &self.suggested_filename)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum StartOutcome {
    Ready(ReadyDownload),
    /// Stopped by `abort`; starting again with the same URL resumes.
    Aborted { source_url: String },
}

/// `download_<unix millis>.ts`
pub fn suggested_filename() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("download_{millis}.ts")
}

pub struct DownloadSession {
    orchestrator: Orchestrator,
    control: DownloadControl,
}

impl DownloadSession {
    pub fn new(
        transport: Arc<dyn ByteTransport>,
        store: Arc<dyn ProgressStore>,
        staging: Arc<dyn StagingProvider>,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(transport, store, staging),
            control: DownloadControl::new(),
        }
    }

    /// Download the best rendition of the variant index at `url`, resuming
    /// from any stored progress.
    ///
    /// Dropping the returned future stops the download and frees the session,
    /// leaving the state `Aborted`.
    pub async fn start(
        &self,
        url: &str,
        options: DownloadOptions,
    ) -> Result<StartOutcome, DownloadError> {
        let guard = self
            .control
            .acquire(Activity::Download)
            .map_err(DownloadError::Busy)?;
        let res = self.orchestrator.run(url, &options, guard.token()).await;
        drop(guard);

        Ok(match res? {
            RunOutcome::Completed => StartOutcome::Ready(ReadyDownload {
                source_url: url.to_string(),
                staging: self.orchestrator.staging_for(url),
                suggested_filename: suggested_filename(),
            }),
            RunOutcome::Aborted => StartOutcome::Aborted {
                source_url: url.to_string(),
            },
        })
    }

    /// Cancel the running download, if any. Safe to call repeatedly.
    pub fn abort(&self) {
        if !self.control.request_abort() {
            tracing::debug!("abort with no active download");
        }
    }

    pub fn state(&self) -> DownloadState {
        self.orchestrator.state()
    }

    /// Staging area of `source_url`, for saving a download finished earlier.
    pub fn staging_for(&self, source_url: &str) -> Arc<dyn BlobStaging> {
        self.orchestrator.staging_for(source_url)
    }

    /// Assemble `source_url`'s staged segments into `sink` as `filename`.
    pub async fn save(
        &self,
        source_url: &str,
        staging: &dyn BlobStaging,
        filename: &str,
        sink: &mut dyn DestinationSink,
    ) -> Result<SaveReport, SaveError> {
        let _guard = self
            .control
            .acquire(Activity::Save)
            .map_err(SaveError::Busy)?;
        assembler::save(
            source_url,
            staging,
            filename,
            sink,
            self.orchestrator.store().as_ref(),
        )
        .await
    }

    /// `save` with the suggested filename unless `filename` is given.
    pub async fn save_ready(
        &self,
        ready: &ReadyDownload,
        filename: Option<&str>,
        sink: &mut dyn DestinationSink,
    ) -> Result<SaveReport, SaveError> {
        let name = filename.unwrap_or(&ready.suggested_filename);
        self.save(&ready.source_url, ready.staging.as_ref(), name, sink)
            .await
    }

    /// Drop the stored record and staged segments of `source_url`.
    pub async fn discard(&self, source_url: &str) -> Result<(), DownloadError> {
        let _guard = self
            .control
            .acquire(Activity::Discard)
            .map_err(DownloadError::Busy)?;
        self.orchestrator.staging_for(source_url).clear().await?;
        self.orchestrator.store().delete(source_url).await?;
        tracing::info!(url = source_url, "discarded");
        Ok(())
    }

    /// Every stored progress record.
    pub async fn records(&self) -> Result<Vec<(String, ProgressRecord)>, StoreError> {
        self.orchestrator.store().list().await
    }
}
