//! Throttling policies and the catalog that maps operation classes to them.
//!
//! Callers pick a class by what the gated operation does, never from request
//! input, so a caller cannot choose its own leniency.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Longest window or base block a policy may declare.
pub const MAX_POLICY_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Errors raised when a policy is registered with invalid settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("policy '{name}': max_requests must be greater than zero")]
    ZeroQuota { name: String },
    #[error("policy '{name}': window duration must be greater than zero")]
    ZeroWindow { name: String },
    #[error("policy '{name}': {field} duration exceeds {} seconds", MAX_POLICY_DURATION.as_secs())]
    DurationTooLong { name: String, field: &'static str },
    #[error("unknown policy class '{0}'")]
    UnknownClass(String),
}

/// Immutable throttling settings for one class of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    max_requests: u64,
    window: Duration,
    block: Duration,
}

impl ThrottlePolicy {
    /// Create a policy, validating it under the given name.
    ///
    /// When `block` is `None` the block duration defaults to twice the window.
    pub fn new(
        name: &str,
        max_requests: u64,
        window: Duration,
        block: Option<Duration>,
    ) -> Result<Self, PolicyError> {
        if max_requests == 0 {
            return Err(PolicyError::ZeroQuota {
                name: name.to_string(),
            });
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow {
                name: name.to_string(),
            });
        }
        if window > MAX_POLICY_DURATION {
            return Err(PolicyError::DurationTooLong {
                name: name.to_string(),
                field: "window",
            });
        }

        let block = block.unwrap_or(window * 2);
        if block > MAX_POLICY_DURATION {
            return Err(PolicyError::DurationTooLong {
                name: name.to_string(),
                field: "block",
            });
        }

        Ok(Self {
            max_requests,
            window,
            block,
        })
    }

    /// Requests allowed per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Length of one counting window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Base penalty applied on the first violation.
    pub fn block(&self) -> Duration {
        self.block
    }
}

/// Built-in operation classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyClass {
    /// AI-assisted chat and scoring calls
    ExpensiveAi,
    /// Receipt and document image scanning
    ImageScan,
    /// Ordinary API calls
    GenericApi,
    /// Webhooks received from third parties
    InboundWebhook,
}

impl PolicyClass {
    /// All built-in classes.
    pub const ALL: [PolicyClass; 4] = [
        PolicyClass::ExpensiveAi,
        PolicyClass::ImageScan,
        PolicyClass::GenericApi,
        PolicyClass::InboundWebhook,
    ];

    /// Stable name used in configuration and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyClass::ExpensiveAi => "expensive-ai",
            PolicyClass::ImageScan => "image-scan",
            PolicyClass::GenericApi => "generic-api",
            PolicyClass::InboundWebhook => "inbound-webhook",
        }
    }

    /// Default settings: (max requests, window seconds, block seconds).
    fn defaults(&self) -> (u64, u64, u64) {
        match self {
            PolicyClass::ExpensiveAi => (20, 60, 300),
            PolicyClass::ImageScan => (30, 60, 180),
            PolicyClass::GenericApi => (100, 60, 120),
            PolicyClass::InboundWebhook => (500, 60, 60),
        }
    }
}

impl fmt::Display for PolicyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyClass {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PolicyClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| PolicyError::UnknownClass(s.to_string()))
    }
}

/// Named set of validated policies.
///
/// The catalog is read-only once built and is passed to whoever needs it;
/// several catalogs can coexist (e.g. in tests).
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    policies: HashMap<String, ThrottlePolicy>,
}

impl PolicyCatalog {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// The catalog of built-in classes with their default settings.
    pub fn builtin() -> Self {
        let policies = PolicyClass::ALL
            .into_iter()
            .map(|class| {
                let (max_requests, window_secs, block_secs) = class.defaults();
                let policy = ThrottlePolicy {
                    max_requests,
                    window: Duration::from_secs(window_secs),
                    block: Duration::from_secs(block_secs),
                };
                (class.as_str().to_string(), policy)
            })
            .collect();

        Self { policies }
    }

    /// Add or replace a policy under `name`.
    pub fn with_policy(mut self, name: impl Into<String>, policy: ThrottlePolicy) -> Self {
        self.policies.insert(name.into(), policy);
        self
    }

    /// Policy for a built-in class.
    ///
    /// Returns `None` only if the class was removed from a custom catalog.
    pub fn get(&self, class: PolicyClass) -> Option<&ThrottlePolicy> {
        self.policies.get(class.as_str())
    }

    /// Policy registered under an arbitrary name.
    pub fn get_named(&self, name: &str) -> Result<&ThrottlePolicy, PolicyError> {
        self.policies
            .get(name)
            .ok_or_else(|| PolicyError::UnknownClass(name.to_string()))
    }

    /// Names of all registered policies, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
