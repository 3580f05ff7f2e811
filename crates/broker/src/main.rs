//! ModelGrid Broker - Main Entry Point
//!
//! This is the main entry point for the ModelGrid broker. It accepts worker
//! connections, schedules inference dispatches, and serves the HTTP front
//! door.

use modelgrid_broker::http::{self, AppState};
use modelgrid_broker::{session, Scheduler, WorkerRegistry};
use modelgrid_common::{ModelGridConfig, ModelGridError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelgrid_broker=info,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ModelGrid Broker");

    // Load configuration
    let config_path = std::env::var("MODELGRID_CONFIG")
        .unwrap_or_else(|_| "configs/broker-config.yaml".to_string());

    let config = ModelGridConfig::from_file(&config_path)?;

    info!(
        "Broker configuration loaded: mode={}, bind={}:{}",
        config.mode, config.bind_address, config.port
    );

    let broker_config = config
        .broker
        .as_ref()
        .ok_or_else(|| ModelGridError::config("Broker config not found"))?;

    let registry = Arc::new(WorkerRegistry::new());
    let scheduler = Arc::new(Scheduler::new(registry.clone(), broker_config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Worker transport
    let worker_listener =
        TcpListener::bind(format!("{}:{}", config.bind_address, config.port)).await?;
    info!(
        "Worker transport listening on {}",
        worker_listener.local_addr()?
    );

    let listener_task = tokio::spawn(session::run_listener(
        worker_listener,
        registry.clone(),
        Duration::from_secs(broker_config.handshake_timeout_secs),
        shutdown_rx.clone(),
    ));

    // HTTP front door
    let state = AppState {
        registry: registry.clone(),
        scheduler,
        api_key: Arc::from(broker_config.api_key.as_str()),
        shutdown: shutdown_tx.clone(),
    };
    let app = http::create_routes(state);

    let http_listener = TcpListener::bind(format!(
        "{}:{}",
        config.bind_address, broker_config.http_port
    ))
    .await?;
    info!("HTTP front door listening on {}", http_listener.local_addr()?);

    let mut signal_rx = shutdown_rx.clone();
    axum::serve(http_listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal::ctrl_c() => info!("Received shutdown signal"),
                _ = signal_rx.changed() => info!("Shutdown requested via front door"),
            }
        })
        .await?;

    // Idempotent on the /shutdown path; does the work on the Ctrl-C path.
    registry.shutdown_drain().await;
    let _ = shutdown_tx.send(true);
    let _ = listener_task.await;

    info!("ModelGrid Broker shutdown complete");
    Ok(())
}
