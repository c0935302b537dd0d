//! Wire messages for `tollgate.v1.ThrottleService`.
//!
//! Written by hand with prost derives; the service stubs are generated by
//! build.rs from the same type paths.

/// Request to throttle one gated operation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckRequest {
    /// Authenticated caller id, or network address for anonymous callers
    #[prost(string, tag = "1")]
    pub identity: ::prost::alloc::string::String,
    /// Stable operation name, e.g. `ai-chat`
    #[prost(string, tag = "2")]
    pub operation: ::prost::alloc::string::String,
    /// Policy class registered in the catalog, e.g. `expensive-ai`
    #[prost(string, tag = "3")]
    pub policy_class: ::prost::alloc::string::String,
}

/// A response header the caller should attach.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

/// The decision plus its HTTP rendering.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckResponse {
    #[prost(bool, tag = "1")]
    pub allowed: bool,
    #[prost(uint64, tag = "2")]
    pub remaining: u64,
    #[prost(uint64, tag = "3")]
    pub limit: u64,
    /// ISO-8601 reset time
    #[prost(string, tag = "4")]
    pub reset_at: ::prost::alloc::string::String,
    /// Reset time as Unix seconds
    #[prost(int64, tag = "5")]
    pub reset_at_unix: i64,
    #[prost(uint64, optional, tag = "6")]
    pub retry_after_seconds: ::core::option::Option<u64>,
    #[prost(uint32, tag = "7")]
    pub http_status: u32,
    #[prost(message, repeated, tag = "8")]
    pub headers: ::prost::alloc::vec::Vec<Header>,
    /// JSON denial body; empty when allowed
    #[prost(string, tag = "9")]
    pub body: ::prost::alloc::string::String,
}

include!(concat!(env!("OUT_DIR"), "/tollgate.v1.ThrottleService.rs"));
