//! devkit-relay server binary

use std::net::SocketAddr;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use devkit_relay::{build_router, config::Config, handlers::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let config = Config::from_env();

    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        max_concurrent = config.max_concurrent,
        default_timeout = config.default_timeout,
        max_redirects = config.max_redirects,
        max_request_body_size = config.max_request_body_size,
        max_response_body_size = config.max_response_body_size,
        server_timeout = config.server_timeout,
        allow_private_ips = config.allow_private_ips,
        auth_enabled = config.jwt_secret.is_some(),
        require_auth = config.require_auth,
        "Starting devkit-relay"
    );

    if config.require_auth && config.jwt_secret.is_none() {
        anyhow::bail!("REQUIRE_AUTH is set but JWT_SECRET is missing");
    }
    if config.jwt_secret.is_none() {
        warn!("JWT_SECRET not set, history endpoints will reject every request");
    }

    // Create shared application state
    let state = AppState::new(config.clone()).map_err(anyhow::Error::msg)?;
    let app = build_router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "Server listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
