use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogFormat, StoreBackend, StoreConfig, TollgateConfig};
use tollgate::grpc::GrpcServer;
use tollgate::throttle::{CounterStore, Limiter, MemoryCounterStore};

/// Request throttling service for expensive backend operations.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address for the gRPC server, overriding configuration
    #[arg(long)]
    grpc_addr: Option<std::net::SocketAddr>,

    /// Log output format, overriding configuration
    #[arg(long, value_parser = ["text", "json"])]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TollgateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.grpc_addr {
        config.server.grpc_addr = addr;
    }
    if let Some(format) = args.log_format.as_deref() {
        config.logging.format = if format == "json" {
            LogFormat::Json
        } else {
            LogFormat::Text
        };
    }

    init_tracing(&config);

    info!("Starting Tollgate Throttling Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Reject bad policies before serving anything
    let catalog = Arc::new(config.catalog()?);
    info!(
        grpc_addr = %config.server.grpc_addr,
        policies = ?catalog.names(),
        "Configuration loaded"
    );

    let store = open_store(&config.store).await?;
    let limiter = Arc::new(Limiter::new(store).with_settings(config.limiter.clone()));
    info!(write_mode = ?config.limiter.write_mode, "Limiter initialized");

    let grpc_server = GrpcServer::new(config.server.grpc_addr, limiter, catalog);

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Tollgate Throttling Service stopped");
    Ok(())
}

fn init_tracing(config: &TollgateConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory counter store; counters are not shared or persisted");
            Ok(Arc::new(MemoryCounterStore::new()))
        }
        StoreBackend::Redis => open_redis_store(config).await,
    }
}

#[cfg(feature = "redis-store")]
async fn open_redis_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    let url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("store.redis_url is required for the redis backend"))?;
    let store = tollgate::throttle::store::RedisCounterStore::connect(url, &config.key_prefix).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis-store"))]
async fn open_redis_store(_config: &StoreConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    anyhow::bail!("the redis backend requires building with the `redis-store` feature")
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
