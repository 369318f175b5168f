//! Multipart Upload Server
//!
//! Accepts large files as independently uploaded chunks, merges them on
//! request and reclaims abandoned staged files in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use multipart_upload_server::config::{Config, KvBackend};
use multipart_upload_server::kv::{KvStore, MemoryKvStore, RedisKvStore};
use multipart_upload_server::routes;
use multipart_upload_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "multipart_upload_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Multipart Upload Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Staging root: {}", config.storage.upload_path.display());
    tracing::info!("Final root: {}", config.storage.final_path.display());

    // Connect the shared store
    let store: Arc<dyn KvStore> = match config.kv.backend {
        KvBackend::Redis => {
            let store = RedisKvStore::connect(&config.kv.redis_url)
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!("Connected to Redis at {}", config.kv.redis_url);
            Arc::new(store)
        }
        KvBackend::Memory => {
            tracing::warn!("Using in-memory store, state is not shared between nodes");
            Arc::new(MemoryKvStore::new())
        }
    };

    let app_state = AppState::new(config.clone(), store);

    // Start the deferred deletion sweep
    let sweeper = app_state
        .uploader()
        .delay_scheduler()
        .start(config.upload.poll_interval);
    tracing::info!(
        "Deferred deletion every {:?}, retention {:?}",
        config.upload.poll_interval,
        config.upload.retention
    );

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server with graceful shutdown
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid SERVER_HOST '{}'", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Multipart Upload Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
