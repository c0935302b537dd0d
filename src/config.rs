//! Configuration management for Tollgate.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, TollgateError};
use crate::throttle::{LimiterSettings, PolicyCatalog, ThrottlePolicy};

/// Prefix for environment overrides, e.g. `TOLLGATE__SERVER__GRPC_ADDR`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Limiter tunables
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Policy overrides and additions, keyed by class name
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map; state is lost on restart
    #[default]
    Memory,
    /// Shared Redis instance (requires the `redis-store` feature)
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL for the Redis backend
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace prepended to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    "tollgate:".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Policy settings as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Base block length in seconds; twice the window when unset
    #[serde(default)]
    pub block_secs: Option<u64>,
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file layered under
    /// `TOLLGATE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Yaml));
        }

        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Build the policy catalog: built-in classes plus configured overrides.
    ///
    /// Invalid policies are rejected here, before any request is served.
    pub fn catalog(&self) -> Result<PolicyCatalog> {
        let mut catalog = PolicyCatalog::builtin();

        for (name, policy) in &self.policies {
            let validated = ThrottlePolicy::new(
                name,
                policy.max_requests,
                Duration::from_secs(policy.window_secs),
                policy.block_secs.map(Duration::from_secs),
            )?;
            debug!(
                policy = %name,
                max_requests = validated.max_requests(),
                window_secs = policy.window_secs,
                block_secs = validated.block().as_secs(),
                "Registered throttle policy"
            );
            catalog = catalog.with_policy(name.clone(), validated);
        }

        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::{PolicyClass, PolicyError, WriteMode};

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.server.grpc_addr, SocketAddr::from(([127, 0, 0, 1], 8081)));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.key_prefix, "tollgate:");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.limiter.write_mode, WriteMode::CompareAndSwap);
        assert!(config.policies.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  grpc_addr: 0.0.0.0:9000
store:
  backend: redis
  redis_url: redis://cache:6379
limiter:
  write_mode: last_writer_wins
  max_escalation: 3
logging:
  level: debug
  format: json
policies:
  expensive-ai:
    max_requests: 10
    window_secs: 60
    block_secs: 600
  pdf-export:
    max_requests: 5
    window_secs: 30
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.grpc_addr.port(), 9000);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.limiter.write_mode, WriteMode::LastWriterWins);
        assert_eq!(config.limiter.max_escalation, 3);
        assert_eq!(config.limiter.max_write_attempts, 3);
        assert_eq!(config.logging.format, LogFormat::Json);

        let catalog = config.catalog().unwrap();
        let ai = catalog.get(PolicyClass::ExpensiveAi).unwrap();
        assert_eq!(ai.max_requests(), 10);
        assert_eq!(ai.block(), Duration::from_secs(600));

        let pdf = catalog.get_named("pdf-export").unwrap();
        assert_eq!(pdf.block(), Duration::from_secs(60));

        // Untouched built-ins keep their defaults.
        assert_eq!(
            catalog.get(PolicyClass::ImageScan).unwrap().max_requests(),
            30
        );
    }

    #[test]
    fn test_invalid_policy_rejected_at_load() {
        let yaml = r#"
policies:
  broken:
    max_requests: 0
    window_secs: 60
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        let err = config.catalog().unwrap_err();
        assert!(matches!(
            err,
            TollgateError::Policy(PolicyError::ZeroQuota { .. })
        ));
    }

    #[test]
    fn test_oversized_block_rejected_at_load() {
        let yaml = r#"
policies:
  glacial:
    max_requests: 1
    window_secs: 60
    block_secs: 10000000000000
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        let err = config.catalog().unwrap_err();
        assert!(matches!(
            err,
            TollgateError::Policy(PolicyError::DurationTooLong { field: "block", .. })
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = TollgateConfig::from_yaml("server: [unclosed").unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = TollgateConfig::load(None).unwrap();
        assert_eq!(config.store.key_prefix, "tollgate:");
    }
}
