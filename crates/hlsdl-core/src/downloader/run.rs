//! Bounded worker pool draining the remaining-segment queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::manifest::SegmentDescriptor;
use crate::progress::{ProgressRecord, ProgressStore};
use crate::storage::{segment_key, BlobStaging};

use super::segment::{SegmentError, SegmentFetcher};
use super::{DownloadError, ProgressCallback};

type WorkQueue = Mutex<VecDeque<SegmentDescriptor>>;

/// Everything a worker needs, shared by all workers of one run.
pub(super) struct PoolContext {
    pub source_url: String,
    pub fetcher: SegmentFetcher,
    pub store: Arc<dyn ProgressStore>,
    pub staging: Arc<dyn BlobStaging>,
    /// Held across the durable `put` so snapshots reach the store in order.
    pub record: Arc<tokio::sync::Mutex<ProgressRecord>>,
    pub on_progress: Option<ProgressCallback>,
}

fn lock_queue(work: &WorkQueue) -> MutexGuard<'_, VecDeque<SegmentDescriptor>> {
    work.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `pending` through `concurrency` workers until the queue drains, `token`
/// is cancelled, or one segment fails for good. A failure stops the other
/// workers and is returned; cancellation is not an error.
pub(super) async fn run_pool(
    ctx: Arc<PoolContext>,
    pending: Vec<SegmentDescriptor>,
    concurrency: usize,
    token: &CancellationToken,
) -> Result<(), DownloadError> {
    let count = pending.len();
    if count == 0 {
        return Ok(());
    }
    let work: Arc<WorkQueue> = Arc::new(Mutex::new(pending.into_iter().collect()));
    // Child token: a failing worker stops its siblings without touching the caller's token.
    let pool_token = token.child_token();
    let num_workers = concurrency.max(1).min(count);

    let mut handles = Vec::with_capacity(num_workers);
    for worker_id in 0..num_workers {
        let ctx = Arc::clone(&ctx);
        let work = Arc::clone(&work);
        let pool_token = pool_token.clone();
        handles.push(tokio::spawn(async move {
            let res = worker(worker_id, &ctx, &work, &pool_token).await;
            if res.is_err() {
                pool_token.cancel();
            }
            res
        }));
    }

    let mut first_error: Option<DownloadError> = None;
    for h in handles {
        let res = match h.await {
            Ok(res) => res,
            Err(e) => {
                pool_token.cancel();
                Err(DownloadError::Worker(e))
            }
        };
        if let Err(e) = res {
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }

    let left = lock_queue(&work).len();
    if left > 0 {
        tracing::debug!(
            url = %ctx.source_url,
            remaining = left,
            "worker pool stopped with work queued"
        );
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn worker(
    worker_id: usize,
    ctx: &PoolContext,
    work: &WorkQueue,
    token: &CancellationToken,
) -> Result<(), DownloadError> {
    loop {
        if token.is_cancelled() {
            return Ok(());
        }
        let segment = match lock_queue(work).pop_front() {
            Some(s) => s,
            None => return Ok(()),
        };
        let index = segment.index;

        let bytes = match ctx.fetcher.fetch_segment(&segment.url, token).await {
            Ok(bytes) => bytes,
            Err(SegmentError::Cancelled) => {
                tracing::debug!(worker_id, index, "segment cancelled, requeued");
                lock_queue(work).push_front(segment);
                return Ok(());
            }
            Err(source) => {
                tracing::error!(worker_id, index, url = %segment.url, "segment failed: {}", source);
                lock_queue(work).push_front(segment);
                return Err(DownloadError::Segment { index, source });
            }
        };

        if let Err(e) = commit(ctx, index, &bytes).await {
            lock_queue(work).push_front(segment);
            return Err(e);
        }
    }
}

/// Stage the bytes, then durably record the index, then report progress.
/// The record never claims an index whose blob write did not succeed.
async fn commit(ctx: &PoolContext, index: usize, bytes: &[u8]) -> Result<(), DownloadError> {
    ctx.staging.write(&segment_key(index), bytes).await?;

    let mut record = ctx.record.lock().await;
    let inserted = record.mark_downloaded(index);
    if let Err(e) = ctx.store.put(&ctx.source_url, &record).await {
        if inserted {
            record.unmark(index);
        }
        return Err(e.into());
    }
    let fraction = record.fraction();
    tracing::debug!(
        index,
        done = record.downloaded_count(),
        total = record.total_segments,
        "segment staged"
    );
    if let Some(cb) = &ctx.on_progress {
        cb(fraction);
    }
    Ok(())
}
