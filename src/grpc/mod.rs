//! gRPC surface through which gated operations ask for a throttle decision.

pub mod proto;
mod server;
mod service;

pub use server::GrpcServer;
pub use service::ThrottleServiceImpl;

// Re-export commonly used types
pub use proto::throttle_service_server::ThrottleServiceServer;
pub use proto::{CheckRequest, CheckResponse, Header};
