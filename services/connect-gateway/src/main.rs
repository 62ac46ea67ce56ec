//! Connect Gateway
//!
//! Issues OAuth `state` tokens (optionally with a PKCE challenge) for
//! platform connections and validates each callback state exactly once within
//! the attempt TTL. Abandoned attempts are swept in the background.

mod config;
mod error;
mod metrics;
mod routes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use connect_auth::{AuthorizationAttempt, AuthorizationStateService, MemoryStateStore, spawn_sweeper};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::routes::{AppState, build_router};

/// Grace period for in-flight requests once a signal arrives.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let prometheus = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let config_path = Config::resolve_path(config_flag(&args));
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        path = %config_path.display(),
        listen_addr = %config.server.listen_addr,
        state_ttl_secs = config.oauth.state_ttl_secs,
        sweep_interval_secs = config.oauth.sweep_interval_secs,
        platforms = ?config.oauth.platforms,
        "connect-gateway configured"
    );

    let service = Arc::new(AuthorizationStateService::new(
        Arc::new(MemoryStateStore::<AuthorizationAttempt>::new()),
        config.oauth.platforms.iter().copied(),
        config.oauth.state_ttl(),
    ));
    let sweeper = spawn_sweeper(service.store(), config.oauth.sweep_interval());

    let app = build_router(
        AppState {
            service,
            started_at: Instant::now(),
            prometheus,
        },
        config.server.max_connections,
    );

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "accepting requests");

    serve_until_signal(listener, app).await;

    // Sweeper outlives the drain.
    sweeper.shutdown().await;
    info!("connect-gateway stopped");
    Ok(())
}

/// JSON logs filtered by `LOG_LEVEL`, then `RUST_LOG`, then `info`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Value following `--config`, if any.
fn config_flag(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Serve until SIGINT/SIGTERM, then give in-flight requests [`DRAIN_TIMEOUT`].
async fn serve_until_signal(listener: TcpListener, app: Router) {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let signal = shutdown_signal().await;
    info!(signal, "shutting down");
    let _ = stop_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server).await {
        Ok(Ok(Ok(()))) => info!("requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error while draining"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, dropping open connections"
        ),
    }
}

/// Resolves with the name of the signal received.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
