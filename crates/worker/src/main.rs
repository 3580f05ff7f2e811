//! ModelGrid Worker - Main Entry Point
//!
//! This is the main entry point for the ModelGrid worker. It loads the model
//! catalog from configuration, builds the inference backend, and runs the
//! agent's connect/serve/reconnect loop until interrupted.

use modelgrid_common::{ModelGridConfig, ModelGridError, Result};
use modelgrid_worker::Agent;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelgrid_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ModelGrid Worker");

    // Load configuration
    let config_path = std::env::var("MODELGRID_CONFIG")
        .unwrap_or_else(|_| "configs/worker-config.yaml".to_string());

    let config = ModelGridConfig::from_file(&config_path)?;

    let worker_config = config
        .worker
        .as_ref()
        .ok_or_else(|| ModelGridError::config("Worker config not found"))?;

    info!(
        "Worker configuration loaded: broker={}, backend={}, {} models",
        worker_config.broker_addr,
        worker_config.backend,
        worker_config.models.len()
    );

    let agent = Agent::new(worker_config.clone())?;
    let agent_task = tokio::spawn(agent.run());

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = agent_task => {
            match result {
                Ok(run_result) => run_result?,
                Err(err) => {
                    return Err(ModelGridError::Internal(format!("agent task failed: {}", err)))
                }
            }
        }
    }

    info!("ModelGrid Worker shutdown complete");
    Ok(())
}
