//! # rb-engine
//!
//! Runs the Rusty-Board storage engine: connects to Postgres, makes sure the
//! base schema exists and keeps every active board's preview cache fresh
//! until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use rb_config::{LogFormat, LogSettings, Settings};
use rb_core::CacheScheduler;
use rb_db_postgres::{bootstrap, create_pool, PgBoardStore, StoreSettings};
use secrecy::ExposeSecret;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn store_settings(settings: &Settings) -> StoreSettings {
    StoreSettings {
        bump_limit: settings.board.bump_limit,
        n_last_msg: settings.board.n_last_msg,
        threads_per_page: settings.board.threads_per_page,
        messages_per_page: settings.board.messages_per_page,
        single_page_threshold: settings.board.single_page_threshold,
        operation_timeout: settings.operation_timeout(),
    }
}

/// Resolves on Ctrl+C, or on SIGTERM where there is one.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    init_tracing(&settings.log);

    info!("Starting rb-engine v{}", env!("CARGO_PKG_VERSION"));

    let pool = create_pool(
        settings.database.url.expose_secret(),
        settings.database.max_connections,
    )
    .await
    .context("failed to connect to Postgres")?;
    bootstrap(&pool).await.context("failed to bootstrap schema")?;

    let store = Arc::new(PgBoardStore::new(pool.clone(), store_settings(&settings)));
    let scheduler = CacheScheduler::new(store.clone(), store, settings.cache.refresh_interval());
    let refresh_interval = scheduler.interval();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = scheduler.spawn(shutdown_rx);

    info!(
        refresh_interval_secs = refresh_interval.as_secs(),
        bump_limit = settings.board.bump_limit,
        "rb-engine ready"
    );

    shutdown_signal().await;

    // The scheduler may already be gone, which is fine.
    let _ = shutdown_tx.send(true);
    if let Err(err) = scheduler.await {
        tracing::error!(error = %err, "cache scheduler task failed");
    }
    pool.close().await;

    info!("rb-engine stopped");
    Ok(())
}
