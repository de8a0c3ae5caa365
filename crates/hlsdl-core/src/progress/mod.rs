//! Durable download progress, keyed by source URL.
//!
//! A [`ProgressRecord`] says which segment indices are already staged. The
//! [`ProgressStore`] trait is the persistence seam: [`ResumeDb`] keeps records
//! in SQLite so a download survives process restarts, and
//! [`MemoryProgressStore`] backs tests.

mod bitmap;
mod db;
mod memory;

pub use bitmap::SegmentBitmap;
pub use db::ResumeDb;
pub use memory::MemoryProgressStore;

use async_trait::async_trait;

/// Which segments of a source have been staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub total_segments: usize,
    /// Indices confirmed written to staging; always within `[0, total_segments)`.
    pub downloaded: SegmentBitmap,
    /// Highest completed index. Diagnostic only: workers finish out of order.
    pub last_downloaded_index: Option<usize>,
}

impl ProgressRecord {
    pub fn new(total_segments: usize) -> Self {
        Self {
            total_segments,
            downloaded: SegmentBitmap::new(total_segments),
            last_downloaded_index: None,
        }
    }

    /// Record `index` as staged. Out-of-range indices are ignored.
    pub fn mark_downloaded(&mut self, index: usize) -> bool {
        if index >= self.total_segments {
            tracing::warn!(index, total = self.total_segments, "ignoring out-of-range segment");
            return false;
        }
        let inserted = self.downloaded.set_completed(index);
        self.last_downloaded_index =
            Some(self.last_downloaded_index.map_or(index, |i| i.max(index)));
        inserted
    }

    /// Forget `index` after its staged bytes were consumed by an assembly
    /// that did not complete.
    pub fn unmark(&mut self, index: usize) -> bool {
        self.downloaded.clear_completed(index)
    }

    pub fn is_downloaded(&self, index: usize) -> bool {
        self.downloaded.is_completed(index)
    }

    pub fn downloaded_count(&self) -> usize {
        self.downloaded.count_completed()
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded.all_completed(self.total_segments)
    }

    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total_segments == 0 {
            return 1.0;
        }
        (self.downloaded_count() as f64 / self.total_segments as f64).min(1.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("progress database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("progress database: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable key/value mapping from source URL to its progress record.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, source_url: &str) -> Result<Option<ProgressRecord>, StoreError>;
    async fn put(&self, source_url: &str, record: &ProgressRecord) -> Result<(), StoreError>;
    async fn delete(&self, source_url: &str) -> Result<(), StoreError>;
    /// All stored records, for status display.
    async fn list(&self) -> Result<Vec<(String, ProgressRecord)>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_downloaded_tracks_last_index_and_count() {
        let mut r = ProgressRecord::new(4);
        assert!(r.mark_downloaded(2));
        assert!(r.mark_downloaded(0));
        assert!(!r.mark_downloaded(2));
        assert_eq!(r.downloaded_count(), 2);
        assert_eq!(r.last_downloaded_index, Some(2));
        assert!((r.fraction() - 0.5).abs() < 1e-9);
        assert!(!r.is_complete());
    }

    #[test]
    fn out_of_range_index_is_ignored() {
        let mut r = ProgressRecord::new(2);
        assert!(!r.mark_downloaded(2));
        assert_eq!(r.downloaded_count(), 0);
        assert_eq!(r.last_downloaded_index, None);
    }

    #[test]
    fn empty_record_is_complete() {
        let r = ProgressRecord::new(0);
        assert!(r.is_complete());
        assert_eq!(r.fraction(), 1.0);
    }
}
