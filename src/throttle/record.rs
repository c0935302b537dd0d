//! Counter keys and the persisted counting record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A key that uniquely identifies the counter for one caller and operation.
///
/// The key is `identity:operation`. Identity is whatever stable string the
/// gated operation chose (user id, or network address for anonymous callers).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The caller identity
    pub identity: String,
    /// The gated operation name
    pub operation: String,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(identity: &str, operation: &str) -> Self {
        Self {
            identity: identity.to_string(),
            operation: operation.to_string(),
        }
    }

    /// The composite string used as the storage key.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.identity, self.operation)
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// One counting record per `(identity, operation)` pair.
///
/// Records are created on first sight of a key and mutated afterwards; they
/// are never deleted here. Expiry is purely logical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub key: String,
    pub window_start: DateTime<Utc>,
    pub request_count: u64,
    pub is_blocked: bool,
    pub block_expires_at: Option<DateTime<Utc>>,
    /// Violations in an unbroken chain of blocked windows
    pub consecutive_violations: u32,
    /// Lifetime violations, never reset
    pub total_violations: u64,
    /// Bumped on every persisted update, used for conditional writes
    #[serde(default)]
    pub version: u64,
}

impl CounterRecord {
    /// A fresh record for the first request seen on `key`.
    pub fn first_request(key: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            window_start: now,
            request_count: 1,
            is_blocked: false,
            block_expires_at: None,
            consecutive_violations: 0,
            total_violations: 0,
            version: 0,
        }
    }

    /// Whether a block is in force at `now`.
    pub fn is_block_active(&self, now: DateTime<Utc>) -> bool {
        self.is_blocked && self.block_expires_at.is_some_and(|expires| expires > now)
    }

    /// Apply a partial update in place and bump the version.
    pub fn apply(&mut self, fields: &RecordUpdate) {
        if let Some(window_start) = fields.window_start {
            self.window_start = window_start;
        }
        if let Some(request_count) = fields.request_count {
            self.request_count = request_count;
        }
        if let Some(is_blocked) = fields.is_blocked {
            self.is_blocked = is_blocked;
        }
        if let Some(block_expires_at) = fields.block_expires_at {
            self.block_expires_at = block_expires_at;
        }
        if let Some(consecutive) = fields.consecutive_violations {
            self.consecutive_violations = consecutive;
        }
        if let Some(total) = fields.total_violations {
            self.total_violations = total;
        }
        self.version += 1;
    }
}

/// A partial write against a [`CounterRecord`].
///
/// Only `Some` fields are written. `block_expires_at: Some(None)` clears the
/// expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub window_start: Option<DateTime<Utc>>,
    pub request_count: Option<u64>,
    pub is_blocked: Option<bool>,
    pub block_expires_at: Option<Option<DateTime<Utc>>>,
    pub consecutive_violations: Option<u32>,
    pub total_violations: Option<u64>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window_start(mut self, window_start: DateTime<Utc>) -> Self {
        self.window_start = Some(window_start);
        self
    }

    pub fn request_count(mut self, count: u64) -> Self {
        self.request_count = Some(count);
        self
    }

    pub fn blocked_until(mut self, expires_at: DateTime<Utc>) -> Self {
        self.is_blocked = Some(true);
        self.block_expires_at = Some(Some(expires_at));
        self
    }

    pub fn unblocked(mut self) -> Self {
        self.is_blocked = Some(false);
        self.block_expires_at = Some(None);
        self
    }

    pub fn consecutive_violations(mut self, count: u32) -> Self {
        self.consecutive_violations = Some(count);
        self
    }

    pub fn total_violations(mut self, count: u64) -> Self {
        self.total_violations = Some(count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_counter_key_to_string() {
        let key = CounterKey::new("u1", "ai-chat");
        assert_eq!(key.to_string_key(), "u1:ai-chat");
        assert_eq!(key.to_string(), "u1:ai-chat");
    }

    #[test]
    fn test_counter_key_equality() {
        assert_eq!(CounterKey::new("u1", "ai-chat"), CounterKey::new("u1", "ai-chat"));
        assert_ne!(CounterKey::new("u1", "ai-chat"), CounterKey::new("u1", "scan-receipt"));
    }

    #[test]
    fn test_first_request_record() {
        let record = CounterRecord::first_request("u1:ai-chat", t(0));
        assert_eq!(record.request_count, 1);
        assert_eq!(record.window_start, t(0));
        assert!(!record.is_blocked);
        assert_eq!(record.block_expires_at, None);
        assert_eq!(record.consecutive_violations, 0);
        assert_eq!(record.total_violations, 0);
    }

    #[test]
    fn test_block_lapses_without_clearing_flag() {
        let mut record = CounterRecord::first_request("k", t(0));
        record.apply(&RecordUpdate::new().blocked_until(t(0) + Duration::seconds(120)));

        assert!(record.is_block_active(t(119)));
        assert!(!record.is_block_active(t(120)));
        assert!(record.is_blocked);
    }

    #[test]
    fn test_partial_update_only_touches_set_fields() {
        let mut record = CounterRecord::first_request("k", t(0));
        record.total_violations = 7;

        record.apply(&RecordUpdate::new().request_count(4));
        assert_eq!(record.request_count, 4);
        assert_eq!(record.total_violations, 7);
        assert_eq!(record.window_start, t(0));
        assert_eq!(record.version, 1);

        record.apply(&RecordUpdate::new().blocked_until(t(30)));
        record.apply(&RecordUpdate::new().unblocked());
        assert!(!record.is_blocked);
        assert_eq!(record.block_expires_at, None);
        assert_eq!(record.version, 3);
    }
}
