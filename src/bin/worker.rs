//! The `worker` binary: the single-threaded claim/execute/record poll loop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use orchestrator_core::store::open_store;
use orchestrator_core::worker::{self, WorkerConfig};
use orchestrator_core::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let store = open_store(&config.database_url)
        .await
        .context("failed to open Store")?;

    let worker_config = WorkerConfig {
        jobs_dir: PathBuf::from(&config.jobs_dir),
        log_dir: PathBuf::from(&config.log_dir),
        poll_interval: config.poll_interval,
        timeout_secs: config.runner_timeout_secs,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, finishing in-flight attempt");
        let _ = shutdown_tx.send(());
    });

    tracing::info!(jobs_dir = %worker_config.jobs_dir.display(), "starting worker poll loop");
    worker::run(store, worker_config, shutdown_rx).await;

    Ok(())
}
