mod bootstrap;
mod bridge;
mod health;
mod routes;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use switchboard_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

use crate::bridge::EventBridge;

const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging(config: &AppConfig) {
    use switchboard_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bridge =
        EventBridge::new(Arc::new(app.link.clone()), app.hub.clone()).spawn(shutdown_rx.clone());
    let eviction = app.dialogue.clone().spawn_eviction(EVICTION_INTERVAL, shutdown_rx);

    let router = routes::router(app.state.clone(), &app.config.server.static_dir)
        .merge(health::router(app.db_pool.clone(), app.link.watch_state()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        static_dir = %app.config.server.static_dir.display(),
        "switchboard server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "switchboard server stopping"
    );
    shutdown_tx.send_replace(true);

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drained = tokio::time::timeout(grace, async {
        if let Ok(forwarded) = bridge.await {
            tracing::info!(event_name = "bridge.stopped", forwarded, "event bridge stopped");
        }
        let _ = eviction.await;
        app.link.shutdown().await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "background tasks did not stop within the grace period"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            error = %error,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
