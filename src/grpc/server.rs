//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::throttle_service_server::ThrottleServiceServer;
use super::service::ThrottleServiceImpl;
use crate::error::{Result, TollgateError};
use crate::throttle::{Limiter, PolicyCatalog};

/// gRPC server for the throttle service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The limiter instance
    limiter: Arc<Limiter>,
    /// Policies callers may reference
    catalog: Arc<PolicyCatalog>,
}

impl GrpcServer {
    /// Create a new gRPC server.
    pub fn new(addr: SocketAddr, limiter: Arc<Limiter>, catalog: Arc<PolicyCatalog>) -> Self {
        Self {
            addr,
            limiter,
            catalog,
        }
    }

    fn service(&self) -> ThrottleServiceServer<ThrottleServiceImpl> {
        ThrottleServiceServer::new(ThrottleServiceImpl::new(
            self.limiter.clone(),
            self.catalog.clone(),
        ))
    }

    /// Start the gRPC server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.addr, "Starting gRPC server for ThrottleService");

        Server::builder()
            .add_service(self.service())
            .serve(self.addr)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                TollgateError::Grpc(e)
            })
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        info!(
            addr = %self.addr,
            "Starting gRPC server for ThrottleService with graceful shutdown"
        );

        Server::builder()
            .add_service(self.service())
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                TollgateError::Grpc(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::MemoryCounterStore;

    #[test]
    fn test_server_creation() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 8081));
        let limiter = Arc::new(Limiter::new(Arc::new(MemoryCounterStore::new())));
        let _server = GrpcServer::new(addr, limiter, Arc::new(PolicyCatalog::builtin()));
    }

    #[tokio::test]
    async fn test_server_stops_on_signal() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let limiter = Arc::new(Limiter::new(Arc::new(MemoryCounterStore::new())));
        let server = GrpcServer::new(addr, limiter, Arc::new(PolicyCatalog::builtin()));

        server.serve_with_shutdown(async {}).await.unwrap();
    }
}
