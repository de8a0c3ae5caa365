//! Download orchestrator: resolve the manifest, reconcile prior progress, and
//! drive the worker pool to a terminal state.
//!
//! The orchestrator owns the state machine
//! `Idle → Resolving → Downloading → Completed | Aborted | Failed`. Every exit
//! leaves the progress record exactly as the store last saw it, so any run can
//! be resumed by starting again with the same source URL.

mod run;
mod segment;

pub use segment::{FetchFailure, SegmentError, SegmentFetcher};

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::control::Activity;
use crate::manifest::{
    select_highest_quality, Manifest, ManifestError, ManifestResolver, SegmentDescriptor,
};
use crate::progress::{ProgressRecord, ProgressStore, StoreError};
use crate::retry::RetryPolicy;
use crate::storage::{parse_segment_index, BlobStaging, StagingProvider};
use crate::transport::ByteTransport;

use run::{run_pool, PoolContext};

/// Called with the completed fraction in `[0, 1]` after each staged segment.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    Resolving,
    Downloading,
    Completed,
    Aborted,
    Failed,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Idle => "idle",
            DownloadState::Resolving => "resolving",
            DownloadState::Downloading => "downloading",
            DownloadState::Completed => "completed",
            DownloadState::Aborted => "aborted",
            DownloadState::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, DownloadState::Resolving | DownloadState::Downloading)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct DownloadOptions {
    /// Worker pool width; 0 is treated as 1.
    pub concurrency: usize,
    /// Retries per segment after the first attempt.
    pub max_retries: u32,
    /// First backoff delay; doubled on each retry.
    pub base_delay: Duration,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            on_progress: None,
        }
    }
}

impl fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl DownloadOptions {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
        }
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every segment is staged and recorded.
    Completed,
    /// Cancelled; progress so far is durable and resumable.
    Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("segment {index}: {source}")]
    Segment {
        index: usize,
        #[source]
        source: SegmentError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("staging: {0}")]
    Staging(#[from] std::io::Error),
    #[error("download worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    /// The session is busy with another download, a save or a discard.
    #[error("a {0} is already in progress")]
    Busy(Activity),
}

/// Moves a run whose future was dropped mid-flight to `Aborted`. A run that
/// reached a terminal state is left alone.
struct InterruptedRun<'a>(&'a Orchestrator);

impl Drop for InterruptedRun<'_> {
    fn drop(&mut self) {
        if self.0.state().is_active() {
            tracing::warn!("download dropped before finishing");
            self.0.set_state(DownloadState::Aborted);
        }
    }
}

/// Runs one download at a time against the shared store and staging.
pub struct Orchestrator {
    resolver: ManifestResolver,
    transport: Arc<dyn ByteTransport>,
    store: Arc<dyn ProgressStore>,
    staging: Arc<dyn StagingProvider>,
    state: Mutex<DownloadState>,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn ByteTransport>,
        store: Arc<dyn ProgressStore>,
        staging: Arc<dyn StagingProvider>,
    ) -> Self {
        Self {
            resolver: ManifestResolver::new(Arc::clone(&transport)),
            transport,
            store,
            staging,
            state: Mutex::new(DownloadState::Idle),
        }
    }

    pub fn state(&self) -> DownloadState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: DownloadState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = %*state, to = %next, "download state");
        *state = next;
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    pub fn staging_for(&self, source_url: &str) -> Arc<dyn BlobStaging> {
        self.staging.staging_for(source_url)
    }

    /// Download every segment of the best rendition behind `source_url`, a
    /// variant index URL. Returns `Aborted` rather than an error when `token`
    /// fires.
    pub async fn run(
        &self,
        source_url: &str,
        options: &DownloadOptions,
        token: &CancellationToken,
    ) -> Result<RunOutcome, DownloadError> {
        self.set_state(DownloadState::Resolving);
        let _interrupted = InterruptedRun(self);
        let res = match self.run_inner(source_url, options, token).await {
            Err(DownloadError::Manifest(ManifestError::Cancelled)) => Ok(RunOutcome::Aborted),
            other => other,
        };
        self.set_state(match &res {
            Ok(RunOutcome::Completed) => DownloadState::Completed,
            Ok(RunOutcome::Aborted) => DownloadState::Aborted,
            Err(_) => DownloadState::Failed,
        });
        match &res {
            Ok(outcome) => tracing::info!(url = source_url, ?outcome, "download finished"),
            Err(e) => tracing::error!(url = source_url, "download failed: {}", e),
        }
        res
    }

    async fn run_inner(
        &self,
        source_url: &str,
        options: &DownloadOptions,
        token: &CancellationToken,
    ) -> Result<RunOutcome, DownloadError> {
        let segments = self.resolve_segments(source_url, token).await?;
        let staging = self.staging.staging_for(source_url);
        let record = self
            .load_or_init(source_url, segments.len(), staging.as_ref())
            .await?;

        // Snapshot once; the queue is not re-filtered mid-run.
        let pending: Vec<SegmentDescriptor> = segments
            .into_iter()
            .filter(|s| !record.is_downloaded(s.index))
            .collect();
        tracing::info!(
            url = source_url,
            total = record.total_segments,
            done = record.downloaded_count(),
            pending = pending.len(),
            concurrency = options.concurrency,
            "downloading segments"
        );

        self.set_state(DownloadState::Downloading);
        let record = Arc::new(tokio::sync::Mutex::new(record));
        let ctx = Arc::new(PoolContext {
            source_url: source_url.to_string(),
            fetcher: SegmentFetcher::new(Arc::clone(&self.transport), options.retry_policy()),
            store: Arc::clone(&self.store),
            staging,
            record: Arc::clone(&record),
            on_progress: options.on_progress.clone(),
        });
        run_pool(ctx, pending, options.concurrency, token).await?;

        if record.lock().await.is_complete() {
            Ok(RunOutcome::Completed)
        } else {
            Ok(RunOutcome::Aborted)
        }
    }

    /// Variant index → best rendition → its segment list.
    async fn resolve_segments(
        &self,
        source_url: &str,
        token: &CancellationToken,
    ) -> Result<Vec<SegmentDescriptor>, ManifestError> {
        let renditions = match self.resolver.resolve(source_url, token).await? {
            Manifest::VariantIndex(r) => r,
            Manifest::SegmentList(_) => {
                return Err(ManifestError::NotAMasterManifest {
                    url: source_url.to_string(),
                })
            }
        };
        let best = select_highest_quality(&renditions)?;
        tracing::info!(
            url = %best.uri,
            width = best.resolution.map(|r| r.width),
            bandwidth = best.bandwidth,
            "selected rendition"
        );
        self.resolver.segment_list(&best.uri, token).await
    }

    /// Load the stored record for `source_url`, or start a fresh one.
    ///
    /// A stored record whose total disagrees with `total` describes a different
    /// playlist and is dropped along with its staged blobs. Indices the record
    /// claims but staging no longer holds are forgotten. The resulting record
    /// is stored before any segment is fetched.
    async fn load_or_init(
        &self,
        source_url: &str,
        total: usize,
        staging: &dyn BlobStaging,
    ) -> Result<ProgressRecord, DownloadError> {
        let record = match self.store.get(source_url).await? {
            Some(prev) if prev.total_segments == total => {
                let mut record = prev;
                let staged: HashSet<usize> = staging
                    .list()
                    .await?
                    .iter()
                    .filter_map(|k| parse_segment_index(k))
                    .collect();
                let missing: Vec<usize> = record
                    .downloaded
                    .iter_completed()
                    .filter(|i| !staged.contains(i))
                    .collect();
                if !missing.is_empty() {
                    tracing::warn!(
                        url = source_url,
                        count = missing.len(),
                        "recorded segments missing from staging; will fetch again"
                    );
                    for i in missing {
                        record.unmark(i);
                    }
                }
                tracing::debug!(
                    url = source_url,
                    done = record.downloaded_count(),
                    total,
                    "resuming"
                );
                record
            }
            Some(prev) => {
                tracing::warn!(
                    url = source_url,
                    stored = prev.total_segments,
                    resolved = total,
                    "segment count changed since last run; starting over"
                );
                staging.clear().await?;
                ProgressRecord::new(total)
            }
            None => {
                staging.clear().await?;
                ProgressRecord::new(total)
            }
        };
        self.store.put(source_url, &record).await?;
        Ok(record)
    }
}
