//! Ticketing service.
//!
//! Connects to `PostgreSQL`, applies migrations, exposes Prometheus metrics and
//! runs the ticket notification relay until Ctrl+C.

use ticketing::{Config, TicketingApp};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_runtime::metrics::MetricsServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketing=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ticketing service");

    // Load configuration
    let config = Config::from_env();
    config.validate()?;
    info!(
        app_env = %config.app_env,
        max_per_order = ?config.reservations.max_per_order,
        capacity_policy = ?config.reservations.capacity_policy(),
        "Configuration loaded"
    );

    // Metrics
    let mut metrics_server = MetricsServer::new(config.server.metrics_addr()?);
    metrics_server.start()?;
    ticketing::metrics::register_business_metrics();

    let app = TicketingApp::connect(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = app.relay.clone();
    let relay_task = tokio::spawn(async move { relay.run(shutdown_rx).await });

    shutdown_signal().await;
    info!("Shutdown signal received, stopping relay");
    let _ = shutdown_tx.send(true);

    if let Err(error) = relay_task.await {
        error!(%error, "Notification relay task failed");
    }

    info!("Ticketing service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = signal::ctrl_c().await {
        error!(%error, "Failed to listen for Ctrl+C");
    }
}
