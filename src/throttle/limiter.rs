//! Core limiter: fixed-window counting with escalating blocks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::clock::{Clock, SystemClock};
use super::policy::ThrottlePolicy;
use super::record::{CounterKey, CounterRecord, RecordUpdate};
use super::store::{CounterStore, StoreError};

/// Default cap on the block multiplier.
const DEFAULT_MAX_ESCALATION: u32 = 5;
/// Default number of read-compute-write attempts under contention.
const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 3;

/// How the limiter persists the record after deciding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Plain read-modify-write. Concurrent checks on one key can lose updates.
    LastWriterWins,
    /// Conditional writes on the record version, re-evaluated on conflict.
    #[default]
    CompareAndSwap,
}

/// Tunables for the limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    #[serde(default)]
    pub write_mode: WriteMode,

    /// Attempts before giving up on a contended write (compare-and-swap only)
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,

    /// Largest multiple of the base block duration ever applied
    #[serde(default = "default_max_escalation")]
    pub max_escalation: u32,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::default(),
            max_write_attempts: default_max_write_attempts(),
            max_escalation: default_max_escalation(),
        }
    }
}

fn default_max_write_attempts() -> u32 {
    DEFAULT_MAX_WRITE_ATTEMPTS
}

fn default_max_escalation() -> u32 {
    DEFAULT_MAX_ESCALATION
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// Quota of the policy that was applied
    pub limit: u64,
    /// When the window resets, or when the block lifts for denials
    pub reset_at: DateTime<Utc>,
    /// Whole seconds to wait before retrying; set on denials only
    pub retry_after: Option<u64>,
}

impl Decision {
    fn allow(policy: &ThrottlePolicy, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            limit: policy.max_requests(),
            reset_at,
            retry_after: None,
        }
    }

    fn deny(policy: &ThrottlePolicy, reset_at: DateTime<Utc>, retry_after: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit: policy.max_requests(),
            reset_at,
            retry_after: Some(retry_after),
        }
    }

    /// Decision used when the store cannot be read.
    fn fail_open(policy: &ThrottlePolicy, now: DateTime<Utc>) -> Self {
        Self::allow(policy, policy.max_requests(), now)
    }
}

/// The write needed to persist an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Write {
    Create(CounterRecord),
    Update { fields: RecordUpdate, version: u64 },
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Evaluation {
    decision: Decision,
    write: Write,
}

/// Decide on one request given the current record. Pure.
fn evaluate(
    key: &str,
    existing: Option<&CounterRecord>,
    policy: &ThrottlePolicy,
    now: DateTime<Utc>,
    max_escalation: u32,
) -> Evaluation {
    let window = to_chrono(policy.window());

    let Some(record) = existing else {
        return Evaluation {
            decision: Decision::allow(policy, policy.max_requests() - 1, after(now, window)),
            write: Write::Create(CounterRecord::first_request(key, now)),
        };
    };

    if record.is_block_active(now) {
        let expires_at = record.block_expires_at.unwrap_or(now);
        return Evaluation {
            decision: Decision::deny(policy, expires_at, ceil_secs(expires_at - now)),
            write: Write::Nothing,
        };
    }

    let lapsed = now
        .checked_sub_signed(window)
        .is_some_and(|cutoff| record.window_start < cutoff);
    if lapsed {
        // A window that ended in a block keeps the violation chain alive;
        // a clean window breaks it.
        let mut fields = RecordUpdate::new()
            .window_start(now)
            .request_count(1)
            .unblocked();
        if !record.is_blocked {
            fields = fields.consecutive_violations(0);
        }

        return Evaluation {
            decision: Decision::allow(policy, policy.max_requests() - 1, after(now, window)),
            write: Write::Update {
                fields,
                version: record.version,
            },
        };
    }

    let new_count = record.request_count.saturating_add(1);

    if new_count > policy.max_requests() {
        let consecutive = record.consecutive_violations.saturating_add(1);
        let multiplier = consecutive.min(max_escalation.max(1));
        let block = to_chrono(policy.block().saturating_mul(multiplier));
        let expires_at = after(now, block);

        let fields = RecordUpdate::new()
            .request_count(new_count)
            .blocked_until(expires_at)
            .consecutive_violations(consecutive)
            .total_violations(record.total_violations.saturating_add(1));

        return Evaluation {
            decision: Decision::deny(policy, expires_at, ceil_secs(block)),
            write: Write::Update {
                fields,
                version: record.version,
            },
        };
    }

    Evaluation {
        decision: Decision::allow(
            policy,
            policy.max_requests() - new_count,
            after(record.window_start, window),
        ),
        write: Write::Update {
            fields: RecordUpdate::new().request_count(new_count),
            version: record.version,
        },
    }
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// `at + by`, saturating at the latest representable instant.
fn after(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn ceil_secs(duration: Duration) -> u64 {
    (duration.num_milliseconds().max(0) as u64).div_ceil(1000)
}

fn log_decision(key: &str, decision: &Decision, write: &Write) {
    if decision.allowed {
        debug!(key = %key, remaining = decision.remaining, "Request allowed");
        return;
    }

    match write {
        Write::Update { fields, .. } => info!(
            key = %key,
            retry_after = decision.retry_after,
            consecutive_violations = fields.consecutive_violations,
            "Quota exceeded, caller blocked"
        ),
        _ => debug!(
            key = %key,
            retry_after = decision.retry_after,
            "Request denied while blocked"
        ),
    }
}

/// Throttles callers per `(identity, operation)` against a [`CounterStore`].
///
/// The limiter holds no per-key state of its own and can be shared across
/// tasks behind an `Arc`.
pub struct Limiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    settings: LimiterSettings,
}

impl Limiter {
    /// Create a limiter on the system clock with default settings.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            settings: LimiterSettings::default(),
        }
    }

    /// Replace the limiter settings.
    pub fn with_settings(mut self, settings: LimiterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    /// Decide whether `identity` may perform `operation` now.
    ///
    /// Never fails: an unreadable store allows the request, and a failed write
    /// after deciding leaves the decision unchanged.
    pub async fn check(&self, identity: &str, operation: &str, policy: &ThrottlePolicy) -> Decision {
        let key = CounterKey::new(identity, operation).to_string_key();
        let (conditional, attempts) = match self.settings.write_mode {
            WriteMode::LastWriterWins => (false, 1),
            WriteMode::CompareAndSwap => (true, self.settings.max_write_attempts.max(1)),
        };

        trace!(key = %key, max_requests = policy.max_requests(), "Checking throttle");

        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = self.clock.now();

            let existing = match self.store.get(&key).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "Counter store read failed, allowing request");
                    return Decision::fail_open(policy, now);
                }
            };

            let Evaluation { decision, write } = evaluate(
                &key,
                existing.as_ref(),
                policy,
                now,
                self.settings.max_escalation,
            );

            let persisted = match &write {
                Write::Create(initial) => {
                    debug!(key = %key, "Creating counter record");
                    self.store.create(&key, initial).await
                }
                Write::Update { fields, version } => {
                    let expected = conditional.then_some(*version);
                    self.store.update(&key, fields, expected).await
                }
                Write::Nothing => Ok(()),
            };

            match persisted {
                Ok(()) => {
                    log_decision(&key, &decision, &write);
                    return decision;
                }
                Err(e) if e.is_contention() && attempt < attempts => {
                    debug!(key = %key, attempt = attempt, error = %e, "Write contended, re-evaluating");
                }
                Err(e) => {
                    warn!(
                        key = %key,
                        allowed = decision.allowed,
                        error = %e,
                        "Failed to persist counter record"
                    );
                    return decision;
                }
            }
        }
    }

    /// Read the stored record for a key without counting a request.
    pub async fn peek(
        &self,
        identity: &str,
        operation: &str,
    ) -> Result<Option<CounterRecord>, StoreError> {
        let key = CounterKey::new(identity, operation);
        self.store.get(&key.to_string_key()).await
    }
}
