use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ProgressRecord, ProgressStore, StoreError};

/// Process-local progress store. Records vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: Mutex<BTreeMap<String, ProgressRecord>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ProgressRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(&self, source_url: &str) -> Result<Option<ProgressRecord>, StoreError> {
        Ok(self.records().get(source_url).cloned())
    }

    async fn put(&self, source_url: &str, record: &ProgressRecord) -> Result<(), StoreError> {
        self.records()
            .insert(source_url.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, source_url: &str) -> Result<(), StoreError> {
        self.records().remove(source_url);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, ProgressRecord)>, StoreError> {
        Ok(self
            .records()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
