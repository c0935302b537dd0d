//! Durable keyed storage for counter records.
//!
//! Stores do not retry internally: every failure goes back to the limiter,
//! which decides whether to fail open, retry or log.

mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

use async_trait::async_trait;
use thiserror::Error;

use super::record::{CounterRecord, RecordUpdate};

pub use memory::MemoryCounterStore;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisCounterStore;

/// Errors surfaced by a [`CounterStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    /// A conditional update saw a different version than expected.
    #[error("conditional update conflict on '{key}'")]
    Conflict { key: String },
    /// A create raced with another create for the same key.
    #[error("record '{key}' already exists")]
    AlreadyExists { key: String },
    /// An update targeted a key with no record.
    #[error("record '{key}' not found")]
    NotFound { key: String },
    /// A stored row could not be decoded.
    #[error("record '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Whether re-reading and recomputing may succeed.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. }
        )
    }
}

/// Keyed storage of one [`CounterRecord`] per counter key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch the record for `key`, or `None` if it has never been seen.
    async fn get(&self, key: &str) -> Result<Option<CounterRecord>, StoreError>;

    /// Insert the initial record for `key`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if a record is already present.
    async fn create(&self, key: &str, initial: &CounterRecord) -> Result<(), StoreError>;

    /// Write the given fields to the record for `key`.
    ///
    /// With `expected_version` set the write only lands if the stored version
    /// matches, otherwise [`StoreError::Conflict`] is returned. Without it the
    /// write is unconditional and the last writer wins.
    async fn update(
        &self,
        key: &str,
        fields: &RecordUpdate,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError>;
}
