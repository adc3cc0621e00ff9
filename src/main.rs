//! rewrite-proxy - Forwarding HTTP proxy with HTML link rewriting
//!
//! Fetches any URL passed as `/proxy?url=...`, relays the response, and
//! rewrites links, scripts, stylesheets, images and forms in HTML pages so
//! that following them goes back through the proxy.

mod assembler;
mod config;
mod error;
mod fetcher;
mod handlers;
mod models;
mod resolver;
mod rewriter;

use std::{net::SocketAddr, time::Duration};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    config::Config,
    handlers::{router, AppState},
};

/// Create the timeout layer (separate function to allow #[allow(deprecated)])
#[allow(deprecated)]
fn create_timeout_layer(timeout_secs: u64) -> tower_http::timeout::TimeoutLayer {
    tower_http::timeout::TimeoutLayer::new(Duration::from_secs(timeout_secs))
}

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

    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        proxy_path = %config.proxy_path,
        target_param = %config.target_param,
        whitelist_size = config.whitelist.len(),
        upstream_timeout = config.upstream_timeout,
        max_redirects = config.max_redirects,
        max_request_body_size = config.max_request_body_size,
        max_response_body_size = config.max_response_body_size,
        server_timeout = config.server_timeout,
        "Starting rewrite-proxy"
    );

    if config.is_open_proxy() {
        warn!("Running as an OPEN PROXY: no whitelist configured, any host can be relayed through this server");
    }
    if config.insecure_skip_tls_verify {
        warn!("Upstream TLS certificate verification is DISABLED");
    }

    let port = config.port;
    let server_timeout = config.server_timeout;
    let state = AppState::new(config)?;

    // Layers are applied bottom-up, so the last layer added is the outermost
    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_timeout_layer(server_timeout));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "Server listening");

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
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
