//! orgwatch server entry point.
//!
//! Starts the Axum HTTP server and, when enabled, the job scheduler.

use std::time::Duration;

use anyhow::Context;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use orgwatch::api;
use orgwatch::app_state::AppState;
use orgwatch::config::AppConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    init_tracing(&config.log_format);
    tracing::info!(addr = %config.listen_addr, worker = config.worker_enabled, "starting orgwatch");

    // Build stores, clients, services and job handlers
    let state = AppState::from_config(&config)
        .await
        .context("failed to initialise application state")?;
    if config.worker_enabled {
        state.scheduler().start().await;
    }

    // Build router
    let app = api::build_router()
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
        .with_state(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.scheduler().stop().await;
    tracing::info!("orgwatch stopped");
    Ok(())
}
