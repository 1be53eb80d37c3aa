//! The `api` binary: serves the HTTP surface over the shared Store and Job
//! State Directory.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use orchestrator_core::{server::build_app, store::open_store, Config};
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

    let jobs_dir = PathBuf::from(&config.jobs_dir);
    let app = build_app(store, jobs_dir, config.rate_limit_per_min);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "starting api server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server exited with an error")?;

    Ok(())
}
