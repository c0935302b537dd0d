//! Redis-backed counter store shared by every service instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use serde::Serialize;
use tracing::{debug, info};

use super::{CounterStore, StoreError};
use crate::throttle::record::{CounterRecord, RecordUpdate};

/// Applies a partial update to the JSON record, optionally guarded by version.
const UPDATE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return 'missing'
end
local record = cjson.decode(raw)
local expected = tonumber(ARGV[2])
if expected >= 0 and (record.version or 0) ~= expected then
  return 'conflict'
end
local fields = cjson.decode(ARGV[1])
for name, value in pairs(fields) do
  record[name] = value
end
record.version = (record.version or 0) + 1
redis.call('SET', KEYS[1], cjson.encode(record))
return 'ok'
"#;

/// Fields of a [`RecordUpdate`] as sent to the update script.
///
/// Unset fields are omitted; a cleared expiry is sent as `null`.
#[derive(Serialize)]
struct UpdatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    window_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_expires_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    consecutive_violations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_violations: Option<u64>,
}

impl From<&RecordUpdate> for UpdatePayload {
    fn from(fields: &RecordUpdate) -> Self {
        Self {
            window_start: fields.window_start,
            request_count: fields.request_count,
            is_blocked: fields.is_blocked,
            block_expires_at: fields.block_expires_at,
            consecutive_violations: fields.consecutive_violations,
            total_violations: fields.total_violations,
        }
    }
}

/// Counter store persisting each record as a JSON string in Redis.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    key_prefix: String,
    update_script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis at `url`, namespacing keys with `key_prefix`.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;

        info!(key_prefix = %key_prefix, "Connected Redis counter store");

        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            update_script: Script::new(UPDATE_SCRIPT),
        })
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn unavailable(e: RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn corrupt(key: &str, e: serde_json::Error) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<CounterRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.storage_key(key))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        raw.map(|json| serde_json::from_str(&json).map_err(|e| corrupt(key, e)))
            .transpose()
    }

    async fn create(&self, key: &str, initial: &CounterRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(initial).map_err(|e| corrupt(key, e))?;

        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.storage_key(key))
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        match reply {
            Some(_) => Ok(()),
            None => Err(StoreError::AlreadyExists {
                key: key.to_string(),
            }),
        }
    }

    async fn update(
        &self,
        key: &str,
        fields: &RecordUpdate,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(&UpdatePayload::from(fields)).map_err(|e| corrupt(key, e))?;
        let expected = expected_version.map_or(-1, |v| v as i64);

        let mut conn = self.conn.clone();
        let outcome: String = self
            .update_script
            .key(self.storage_key(key))
            .arg(payload)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        debug!(key = %key, outcome = %outcome, "Redis update script finished");

        match outcome.as_str() {
            "ok" => Ok(()),
            "conflict" => Err(StoreError::Conflict {
                key: key.to_string(),
            }),
            "missing" => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            other => Err(StoreError::Unavailable(format!(
                "unexpected update script reply '{}'",
                other
            ))),
        }
    }
}
