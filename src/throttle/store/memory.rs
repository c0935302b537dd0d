//! In-process counter store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{CounterStore, StoreError};
use crate::throttle::record::{CounterRecord, RecordUpdate};

/// Counter store backed by a concurrent hash map.
///
/// Suitable for a single instance and for tests. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    records: DashMap<String, CounterRecord>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<CounterRecord>, StoreError> {
        Ok(self.records.get(key).map(|record| record.clone()))
    }

    async fn create(&self, key: &str, initial: &CounterRecord) -> Result<(), StoreError> {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                key: key.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(initial.clone());
                Ok(())
            }
        }
    }

    async fn update(
        &self,
        key: &str,
        fields: &RecordUpdate,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut record = self.records.get_mut(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;

        if let Some(expected) = expected_version {
            if record.version != expected {
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                });
            }
        }

        record.apply(fields);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("u1:ai-chat").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryCounterStore::new();
        let record = CounterRecord::first_request("u1:ai-chat", Utc::now());

        store.create("u1:ai-chat", &record).await.unwrap();
        assert_eq!(store.get("u1:ai-chat").await.unwrap(), Some(record));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = MemoryCounterStore::new();
        let record = CounterRecord::first_request("k", Utc::now());

        store.create("k", &record).await.unwrap();
        let err = store.create("k", &record).await.unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists { key: "k".to_string() });
        assert!(err.is_contention());
    }

    #[tokio::test]
    async fn test_update_missing_key() {
        let store = MemoryCounterStore::new();
        let err = store
            .update("k", &RecordUpdate::new().request_count(2), None)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound { key: "k".to_string() });
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = MemoryCounterStore::new();
        store
            .create("k", &CounterRecord::first_request("k", Utc::now()))
            .await
            .unwrap();

        store
            .update("k", &RecordUpdate::new().request_count(2), Some(0))
            .await
            .unwrap();

        // Version moved to 1, so a writer still holding version 0 loses.
        let err = store
            .update("k", &RecordUpdate::new().request_count(2), Some(0))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict { key: "k".to_string() });

        // Unconditional writes always land.
        store
            .update("k", &RecordUpdate::new().request_count(9), None)
            .await
            .unwrap();

        let record = store.get("k").await.unwrap().unwrap();
        assert_eq!(record.request_count, 9);
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryCounterStore::new();
        store
            .create("k", &CounterRecord::first_request("k", Utc::now()))
            .await
            .unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
