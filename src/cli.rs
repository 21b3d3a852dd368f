//! Process entrypoint: load config, open the ledger, rebuild the engine,
//! and run the HTTP server alongside the reconciliation loop until shutdown.

use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::state::AppState;
use crate::utils::shutdown_token;
use crate::{api, reconcile};

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load();

    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = AppState::open(&config.data_dir).await?;
    let shutdown = shutdown_token();

    let reconcile_ledger = state.ledger.clone();
    let reconcile_engine = state.engine.clone();
    let reconcile_shutdown = shutdown.clone();
    let reconcile_interval = Duration::from_millis(config.reconcile_interval_ms);
    let reconcile_handle = tokio::spawn(async move {
        reconcile::run(&reconcile_ledger, &reconcile_engine, reconcile_interval, reconcile_shutdown).await;
    });

    let app = api::router(state);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "HTTP server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    shutdown.cancel();
    reconcile_handle.await?;
    Ok(())
}
