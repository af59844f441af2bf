//! Pawket Sync gateway
//!
//! Runs the sync layer against the in-process backend and exposes it over HTTP.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pawket_sync::{
    create_router, spawn_cleanup_task, AppContext, AppState, Config, FileStore, InMemoryBackend,
    KeyValueStore, ListenerHandle, MemoryStore, Seed,
};

/// Main entry point for the gateway.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the key-value store and the backend
/// 4. Build the app context and warm it for the signed-in user
/// 5. Start the TTL sweep and realtime listener
/// 6. Serve HTTP until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pawket_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pawket Sync gateway");

    let config = Config::from_env();
    info!(
        "Configuration loaded: page_size={}, cache_ttl={}s, port={}, cleanup_interval={}s",
        config.feed_page_size, config.cache_ttl, config.server_port, config.cleanup_interval
    );

    let store: Arc<dyn KeyValueStore> = match &config.store_path {
        Some(path) => Arc::new(
            FileStore::open(path)
                .await
                .with_context(|| format!("opening store at {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let backend = match &config.seed_file {
        Some(path) => Arc::new(InMemoryBackend::from_seed(load_seed(path).await?)),
        None => Arc::new(InMemoryBackend::new()),
    };

    let port = config.server_port;
    let cleanup_interval = config.cleanup_interval;
    let ctx = AppContext::new(config, backend, store);
    ctx.initialize().await;

    let cleanup_handle = if cleanup_interval > 0 {
        Some(spawn_cleanup_task(ctx.cache().clone(), cleanup_interval))
    } else {
        None
    };

    let listener_handle = match ctx.default_channels().await {
        Ok(channels) => match ctx.start_realtime(channels).await {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("Realtime unavailable: {}", err);
                None
            }
        },
        Err(err) => {
            info!("Not listening for changes: {}", err);
            None
        }
    };

    let app = create_router(AppState::new(ctx));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle, listener_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn load_seed(path: &Path) -> anyhow::Result<Seed> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let seed = serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))?;
    info!("Loaded backend seed from {}", path.display());
    Ok(seed)
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops background work.
async fn shutdown_signal(cleanup_handle: Option<JoinHandle<()>>, listener_handle: Option<ListenerHandle>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = listener_handle {
        handle.unsubscribe();
        warn!("Realtime listener stopped");
    }
    if let Some(handle) = cleanup_handle {
        handle.abort();
        warn!("Cleanup task aborted");
    }
}
