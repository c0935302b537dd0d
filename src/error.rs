//! Error types for the Tollgate service.

use thiserror::Error;

use crate::throttle::{PolicyError, StoreError};

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid throttling policy
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
