//! Translates limiter decisions into HTTP-style response signals.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::limiter::Decision;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Status for allowed requests.
pub const STATUS_OK: u16 = 200;
/// Status for throttled requests.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// JSON body returned with a denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialBody {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

impl DenialBody {
    pub fn new(retry_after: u64) -> Self {
        Self {
            error: "Rate limit exceeded".to_string(),
            message: format!(
                "Too many requests. Please try again in {} seconds.",
                retry_after
            ),
            retry_after,
        }
    }
}

/// Caller-facing form of a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    /// JSON denial body; `None` when allowed
    pub body: Option<String>,
}

impl ShapedResponse {
    /// Look up a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Stateless formatter for decisions.
pub struct ResponseShaper;

impl ResponseShaper {
    /// Rate limit headers for a decision.
    ///
    /// `Retry-After` is only present on denials.
    pub fn headers(decision: &Decision) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, decision.limit.to_string()),
            (HEADER_REMAINING, decision.remaining.to_string()),
            (HEADER_RESET, Self::reset_timestamp(decision.reset_at)),
        ];

        if !decision.allowed {
            headers.push((HEADER_RETRY_AFTER, Self::retry_after(decision).to_string()));
        }

        headers
    }

    /// Denial payload, or `None` for an allowed decision.
    pub fn denial_body(decision: &Decision) -> Option<DenialBody> {
        (!decision.allowed).then(|| DenialBody::new(Self::retry_after(decision)))
    }

    /// Full response shape: status, headers and JSON body.
    pub fn shape(decision: &Decision) -> ShapedResponse {
        let body = Self::denial_body(decision).map(|body| {
            serde_json::to_string(&body).unwrap_or_else(|_| String::from("{}"))
        });

        ShapedResponse {
            status: if decision.allowed {
                STATUS_OK
            } else {
                STATUS_TOO_MANY_REQUESTS
            },
            headers: Self::headers(decision),
            body,
        }
    }

    /// ISO-8601 UTC rendering of a reset time, millisecond precision.
    pub fn reset_timestamp(at: DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn retry_after(decision: &Decision) -> u64 {
        decision.retry_after.unwrap_or(0)
    }
}
