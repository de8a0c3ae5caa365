//! Ordered reassembly of staged segments into the final output.
//!
//! Blobs are streamed to the sink in numeric index order and removed from
//! staging as soon as the sink has them. Only after the sink finishes is the
//! staging area cleared and the progress record deleted.

mod sink;

pub use sink::{DestinationSink, FileDestination, SinkError};

use std::collections::BTreeMap;

use crate::control::Activity;
use crate::progress::{ProgressRecord, ProgressStore, StoreError};
use crate::storage::{parse_segment_index, BlobStaging};

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// The destination was cancelled by the user. Resumable: retry the save.
    #[error("save cancelled")]
    Cancelled,
    /// The session is busy with a download, another save or a discard.
    #[error("cannot save while a {0} is in progress")]
    Busy(Activity),
    #[error("nothing to save for {url}")]
    NothingToSave { url: String },
    #[error("download of {url} is incomplete ({done}/{total} segments)")]
    Incomplete {
        url: String,
        done: usize,
        total: usize,
    },
    #[error("writing output: {0}")]
    Sink(#[source] std::io::Error),
    #[error("staging: {0}")]
    Staging(#[source] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SinkError> for SaveError {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::Cancelled => SaveError::Cancelled,
            SinkError::Io(e) => SaveError::Sink(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub segments: usize,
    pub bytes: u64,
}

/// Staged keys that name segment indices below `total`, ascending by index.
fn ordered_segments(keys: Vec<String>, total: usize) -> BTreeMap<usize, String> {
    keys.into_iter()
        .filter_map(|k| parse_segment_index(&k).map(|i| (i, k)))
        .filter(|(i, _)| *i < total)
        .collect()
}

/// Assemble the staged segments of `source_url` into `sink` under `filename`.
///
/// Refuses to run unless the stored record says every segment is staged. If
/// the sink fails or is cancelled part way, the segments already drained from
/// staging are dropped from the record, so the next run fetches exactly those
/// again; nothing else changes.
pub async fn save(
    source_url: &str,
    staging: &dyn BlobStaging,
    filename: &str,
    sink: &mut dyn DestinationSink,
    store: &dyn ProgressStore,
) -> Result<SaveReport, SaveError> {
    let mut record = store
        .get(source_url)
        .await?
        .ok_or_else(|| SaveError::NothingToSave {
            url: source_url.to_string(),
        })?;
    if !record.is_complete() {
        return Err(incomplete(source_url, &record));
    }

    let keys = staging.list().await.map_err(SaveError::Staging)?;
    let segments = ordered_segments(keys, record.total_segments);
    let missing: Vec<usize> = (0..record.total_segments)
        .filter(|i| !segments.contains_key(i))
        .collect();
    if !missing.is_empty() {
        tracing::warn!(
            url = source_url,
            count = missing.len(),
            "recorded segments missing from staging"
        );
        for i in &missing {
            record.unmark(*i);
        }
        store.put(source_url, &record).await?;
        return Err(incomplete(source_url, &record));
    }

    sink.begin(filename).await?;
    tracing::info!(url = source_url, filename, segments = segments.len(), "assembling");

    let mut drained = Vec::with_capacity(segments.len());
    let mut bytes = 0u64;
    for (index, key) in &segments {
        if let Err(e) = drain_one(staging, sink, key, &mut bytes).await {
            sink.abort().await;
            forget_drained(source_url, store, &mut record, &drained).await;
            return Err(e);
        }
        drained.push(*index);
    }
    if let Err(e) = sink.finish().await {
        sink.abort().await;
        forget_drained(source_url, store, &mut record, &drained).await;
        return Err(e.into());
    }

    staging.clear().await.map_err(SaveError::Staging)?;
    store.delete(source_url).await?;
    tracing::info!(url = source_url, filename, bytes, "saved");
    Ok(SaveReport {
        segments: drained.len(),
        bytes,
    })
}

async fn drain_one(
    staging: &dyn BlobStaging,
    sink: &mut dyn DestinationSink,
    key: &str,
    bytes: &mut u64,
) -> Result<(), SaveError> {
    let blob = staging.read(key).await.map_err(SaveError::Staging)?;
    sink.write_chunk(&blob).await?;
    staging.remove(key).await.map_err(SaveError::Staging)?;
    *bytes += blob.len() as u64;
    Ok(())
}

/// The record must never claim a segment whose blob is gone.
async fn forget_drained(
    source_url: &str,
    store: &dyn ProgressStore,
    record: &mut ProgressRecord,
    drained: &[usize],
) {
    if drained.is_empty() {
        return;
    }
    for i in drained {
        record.unmark(*i);
    }
    if let Err(e) = store.put(source_url, record).await {
        tracing::error!(
            url = source_url,
            "failed to update progress after interrupted save: {}",
            e
        );
    }
}

fn incomplete(source_url: &str, record: &ProgressRecord) -> SaveError {
    SaveError::Incomplete {
        url: source_url.to_string(),
        done: record.downloaded_count(),
        total: record.total_segments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::MemoryProgressStore;
    use crate::storage::{segment_key, MemoryStaging};
    use crate::testing::{segment_body, MemorySink};

    const URL: &str = "http://cdn.test/master.m3u8";

    /// Stage `total` segments in the given completion order, record them all.
    async fn staged(order: &[usize]) -> (MemoryStaging, MemoryProgressStore) {
        let staging = MemoryStaging::new();
        let store = MemoryProgressStore::new();
        let mut record = ProgressRecord::new(order.len());
        for &i in order {
            staging.write(&segment_key(i), &segment_body(i)).await.unwrap();
            record.mark_downloaded(i);
        }
        store.put(URL, &record).await.unwrap();
        (staging, store)
    }

    #[tokio::test]
    async fn emits_segments_in_numeric_order() {
        let order = [10, 2, 0, 11, 1, 9, 3, 4, 5, 8, 6, 7];
        let (staging, store) = staged(&order).await;
        let mut sink = MemorySink::default();

        let report = save(URL, &staging, "out.ts", &mut sink, &store).await.unwrap();

        let expected: Vec<u8> = (0..12).flat_map(segment_body).collect();
        assert_eq!(sink.bytes, expected);
        assert_eq!(sink.filename.as_deref(), Some("out.ts"));
        assert!(sink.finished);
        assert_eq!(report.segments, 12);
        assert_eq!(report.bytes, expected.len() as u64);
        assert!(staging.list().await.unwrap().is_empty());
        assert!(store.get(URL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_and_out_of_range_keys_are_skipped() {
        let (staging, store) = staged(&[1, 0]).await;
        staging.write("notes.txt", b"junk").await.unwrap();
        staging.write(&segment_key(7), b"stray").await.unwrap();
        let mut sink = MemorySink::default();

        save(URL, &staging, "out.ts", &mut sink, &store).await.unwrap();
        assert_eq!(sink.bytes, [segment_body(0), segment_body(1)].concat());
        assert!(staging.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn incomplete_record_is_refused() {
        let staging = MemoryStaging::new();
        let store = MemoryProgressStore::new();
        let mut record = ProgressRecord::new(3);
        record.mark_downloaded(0);
        staging.write(&segment_key(0), b"a").await.unwrap();
        store.put(URL, &record).await.unwrap();
        let mut sink = MemorySink::default();

        let err = save(URL, &staging, "out.ts", &mut sink, &store).await.unwrap_err();
        assert!(matches!(err, SaveError::Incomplete { done: 1, total: 3, .. }));
        assert!(sink.filename.is_none());
        assert_eq!(staging.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_record_is_nothing_to_save() {
        let staging = MemoryStaging::new();
        let store = MemoryProgressStore::new();
        let mut sink = MemorySink::default();
        let err = save(URL, &staging, "out.ts", &mut sink, &store).await.unwrap_err();
        assert!(matches!(err, SaveError::NothingToSave { .. }));
    }

    #[tokio::test]
    async fn missing_blob_unmarks_record() {
        let (staging, store) = staged(&[0, 1, 2]).await;
        staging.remove(&segment_key(1)).await.unwrap();
        let mut sink = MemorySink::default();

        let err = save(URL, &staging, "out.ts", &mut sink, &store).await.unwrap_err();
        assert!(matches!(err, SaveError::Incomplete { done: 2, total: 3, .. }));
        let record = store.get(URL).await.unwrap().unwrap();
        assert!(!record.is_downloaded(1));
    }

    #[tokio::test]
    async fn cancel_at_begin_leaves_everything_untouched() {
        let (staging, store) = staged(&[0, 1, 2]).await;
        let before = store.get(URL).await.unwrap();
        let mut sink = MemorySink {
            cancel_at_begin: true,
            ..MemorySink::default()
        };

        let err = save(URL, &staging, "out.ts", &mut sink, &store).await.unwrap_err();
        assert!(matches!(err, SaveError::Cancelled));
        assert_eq!(store.get(URL).await.unwrap(), before);
        assert_eq!(staging.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cancel_mid_stream_forgets_only_drained_segments() {
        let (staging, store) = staged(&[0, 1, 2, 3]).await;
        let mut sink = MemorySink {
            cancel_after_chunks: Some(2),
            ..MemorySink::default()
        };

        let err = save(URL, &staging, "out.ts", &mut sink, &store).await.unwrap_err();
        assert!(matches!(err, SaveError::Cancelled));
        assert!(sink.aborted);

        let record = store.get(URL).await.unwrap().unwrap();
        assert_eq!(record.downloaded.iter_completed().collect::<Vec<_>>(), [2, 3]);
        let mut left = staging.list().await.unwrap();
        left.sort();
        assert_eq!(left, [segment_key(2), segment_key(3)]);
    }
}
