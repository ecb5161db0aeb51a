use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mqr::config::Settings;
use mqr::connection::Connection;
use mqr::error::Diagnostic;
use mqr::metrics::encode_metrics;
use mqr::store::create_store;

/// How often the stats snapshot is logged
const STATS_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!(backend = %settings.store.backend, "Configuration loaded");

    let store = create_store(&settings.store)?;

    // Diagnostics from retry loops are logged by a dedicated task
    let (errors_tx, errors_rx) = mpsc::channel(settings.connection.error_channel_capacity.max(1));
    let diagnostics_handle = tokio::spawn(log_diagnostics(errors_rx));

    let connection = Arc::new(
        Connection::open(
            &settings.connection.tag,
            store,
            settings.connection.clone(),
            Some(errors_tx),
        )
        .await?,
    );
    tracing::info!(connection = %connection.name(), "Cleaner connection opened");

    connection.spawn_sweeper(settings.sweep.interval());

    let shutdown = CancellationToken::new();
    let stats_handle = tokio::spawn(log_stats(connection.clone(), shutdown.clone()));

    shutdown_signal_handler().await;
    shutdown.cancel();
    let _ = stats_handle.await;

    let report = connection.close().await?;
    tracing::info!(
        returned = report.total_returned(),
        "Returned own unacked payloads"
    );

    // The error channel closes with the last reporter
    drop(connection);
    let _ = diagnostics_handle.await;

    match encode_metrics() {
        Ok(metrics) => tracing::info!(metrics = %metrics, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }

    tracing::info!("Cleaner shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn log_diagnostics(mut errors: mpsc::Receiver<Diagnostic>) {
    while let Some(diagnostic) = errors.recv().await {
        tracing::error!(
            operation = diagnostic.operation(),
            count = diagnostic.count(),
            error = %diagnostic,
            "Queue diagnostic"
        );
    }
}

/// Periodically log a JSON stats snapshot of every open queue
async fn log_stats(connection: Arc<Connection>, shutdown: CancellationToken) {
    let mut timer = tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = timer.tick() => {
                match collect_stats(&connection).await {
                    Ok(json) => tracing::info!(stats = %json, "Queue stats"),
                    Err(e) => tracing::warn!(error = %e, "Failed to collect stats"),
                }
            }
        }
    }
}

async fn collect_stats(connection: &Connection) -> Result<String> {
    let queues = connection.get_open_queues().await?;
    let stats = connection.collect_stats(&queues).await?;
    Ok(serde_json::to_string(&stats)?)
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
