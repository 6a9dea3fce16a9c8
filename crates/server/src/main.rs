use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use magnetstream_core::{load_config, load_config_from_env, validate_config, Config, HelperCommand};
use magnetstream_server::api::create_router;
use magnetstream_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Config file used when `MAGNETSTREAM_CONFIG` is unset and the file exists.
const DEFAULT_CONFIG_FILE: &str = "magnetstream.toml";

/// How long shutdown waits for helpers to be reaped.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("magnetstream v{}", VERSION);

    let config = load()?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Helper program: {:?}", config.helper.program);
    info!(
        "Max concurrent streams: {}",
        config.relay.max_concurrent_streams
    );

    let helper = HelperCommand::new(config.helper.clone());
    if let Err(e) = helper.validate().await {
        warn!("Streaming helper is not usable yet, requests will fail: {}", e);
    }

    let state = Arc::new(AppState::from_config(config.clone()));
    let relay = Arc::clone(state.relay());

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Helpers are terminated before hyper waits on open streams, so their
    // bodies end and graceful shutdown can complete.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Server shutting down...");
            relay.shutdown(SHUTDOWN_DRAIN_TIMEOUT).await;
        })
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Resolve configuration: `MAGNETSTREAM_CONFIG` must point at an existing
/// file; otherwise `magnetstream.toml` is used when present, falling back to
/// defaults plus environment overrides.
fn load() -> Result<Config> {
    if let Ok(path) = std::env::var("MAGNETSTREAM_CONFIG") {
        let config_path = PathBuf::from(path);
        info!("Loading configuration from {:?}", config_path);
        return load_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        info!("Loading configuration from {:?}", default_path);
        return load_config(&default_path)
            .with_context(|| format!("Failed to load config from {:?}", default_path));
    }

    info!("No config file found, using defaults and environment");
    load_config_from_env().context("Failed to load config from environment")
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
