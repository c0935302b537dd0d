//! Tollgate - Request Throttling Service
//!
//! This crate guards expensive backend operations (AI calls, image scanning,
//! webhooks) with a persisted fixed-window counter per caller and operation.
//! Callers that exceed their quota are blocked for an escalating period.
//! Gated operations ask a single question, through the library or over gRPC:
//! may this caller proceed, and if not, when may it retry.

pub mod config;
pub mod error;
pub mod grpc;
pub mod throttle;
