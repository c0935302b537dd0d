//! Throttle service implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::throttle_service_server::ThrottleService;
use super::proto::{CheckRequest, CheckResponse, Header};
use crate::throttle::{Limiter, PolicyCatalog, ResponseShaper};

/// Implementation of the `tollgate.v1.ThrottleService` gRPC interface.
pub struct ThrottleServiceImpl {
    /// The limiter instance
    limiter: Arc<Limiter>,
    /// Policies callers may reference by class name
    catalog: Arc<PolicyCatalog>,
}

impl ThrottleServiceImpl {
    /// Create a new ThrottleServiceImpl with the given limiter and catalog.
    pub fn new(limiter: Arc<Limiter>, catalog: Arc<PolicyCatalog>) -> Self {
        Self { limiter, catalog }
    }
}

#[tonic::async_trait]
impl ThrottleService for ThrottleServiceImpl {
    /// Decide whether a gated operation may proceed.
    ///
    /// Denials are ordinary responses carrying a 429 rendering, never gRPC errors.
    #[instrument(
        skip(self, request),
        fields(
            identity = %request.get_ref().identity,
            operation = %request.get_ref().operation,
            policy_class = %request.get_ref().policy_class
        )
    )]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let req = request.into_inner();

        debug!("Processing throttle check");

        if req.identity.is_empty() {
            warn!("Received throttle check with empty identity");
            return Err(Status::invalid_argument("identity is required"));
        }

        if req.operation.is_empty() {
            warn!("Received throttle check with empty operation");
            return Err(Status::invalid_argument("operation is required"));
        }

        let policy = self.catalog.get_named(&req.policy_class).map_err(|e| {
            warn!(error = %e, "Received throttle check for unknown policy class");
            Status::invalid_argument(e.to_string())
        })?;

        let decision = self.limiter.check(&req.identity, &req.operation, policy).await;
        let shaped = ResponseShaper::shape(&decision);

        info!(
            allowed = decision.allowed,
            remaining = decision.remaining,
            retry_after = decision.retry_after,
            "Throttle decision made"
        );

        let response = CheckResponse {
            allowed: decision.allowed,
            remaining: decision.remaining,
            limit: decision.limit,
            reset_at: ResponseShaper::reset_timestamp(decision.reset_at),
            reset_at_unix: decision.reset_at.timestamp(),
            retry_after_seconds: decision.retry_after,
            http_status: u32::from(shaped.status),
            headers: shaped
                .headers
                .into_iter()
                .map(|(name, value)| Header {
                    name: name.to_string(),
                    value,
                })
                .collect(),
            body: shaped.body.unwrap_or_default(),
        };

        Ok(Response::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::{MemoryCounterStore, ThrottlePolicy};
    use std::time::Duration;

    fn service(catalog: PolicyCatalog) -> ThrottleServiceImpl {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = Arc::new(Limiter::new(store));
        ThrottleServiceImpl::new(limiter, Arc::new(catalog))
    }

    fn request(identity: &str, operation: &str, class: &str) -> Request<CheckRequest> {
        Request::new(CheckRequest {
            identity: identity.to_string(),
            operation: operation.to_string(),
            policy_class: class.to_string(),
        })
    }

    #[tokio::test]
    async fn test_empty_identity_rejected() {
        let service = service(PolicyCatalog::builtin());

        let result = service.check(request("", "ai-chat", "expensive-ai")).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_empty_operation_rejected() {
        let service = service(PolicyCatalog::builtin());

        let result = service.check(request("u1", "", "expensive-ai")).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unknown_class_rejected() {
        let service = service(PolicyCatalog::builtin());

        let result = service.check(request("u1", "ai-chat", "unlimited")).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_valid_request_returns_allowance() {
        let service = service(PolicyCatalog::builtin());

        let response = service
            .check(request("u1", "ai-chat", "expensive-ai"))
            .await
            .unwrap()
            .into_inner();

        assert!(response.allowed);
        assert_eq!(response.remaining, 19);
        assert_eq!(response.limit, 20);
        assert_eq!(response.http_status, 200);
        assert_eq!(response.retry_after_seconds, None);
        assert!(response.body.is_empty());
        assert!(response
            .headers
            .iter()
            .any(|h| h.name == "X-RateLimit-Remaining" && h.value == "19"));
    }

    #[tokio::test]
    async fn test_denial_rendered_as_429() {
        let tight = ThrottlePolicy::new(
            "tight",
            1,
            Duration::from_secs(60),
            Some(Duration::from_secs(30)),
        )
        .unwrap();
        let service = service(PolicyCatalog::empty().with_policy("tight", tight));

        service.check(request("10.0.0.1", "scan-receipt", "tight")).await.unwrap();
        let response = service
            .check(request("10.0.0.1", "scan-receipt", "tight"))
            .await
            .unwrap()
            .into_inner();

        assert!(!response.allowed);
        assert_eq!(response.http_status, 429);
        assert_eq!(response.retry_after_seconds, Some(30));
        assert!(response
            .headers
            .iter()
            .any(|h| h.name == "Retry-After" && h.value == "30"));
        assert!(response.body.contains("\"retryAfter\":30"));
    }

    #[tokio::test]
    async fn test_reset_at_matches_reset_header() {
        let service = service(PolicyCatalog::builtin());

        let response = service
            .check(request("u1", "ai-chat", "expensive-ai"))
            .await
            .unwrap()
            .into_inner();

        let header = response
            .headers
            .iter()
            .find(|h| h.name == "X-RateLimit-Reset")
            .unwrap();
        assert_eq!(response.reset_at, header.value);
        assert!(response.reset_at.ends_with('Z'));
    }
}
