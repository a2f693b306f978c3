pub mod aggregation;
pub mod api;
pub mod config;
pub mod directory;
pub mod gateway;
pub mod matrix;
pub mod metrics_defs;

use crate::aggregation::AggregationFetcher;
use crate::api::AppState;
use crate::config::Config;
use crate::directory::{DirectoryError, NodeDirectory};
use crate::gateway::{GatewayError, HttpNodeGateway};
use shared::admin_service::{AdminError, AdminService, Readiness};
use shared::http::run_http_service;
use shared::limiter::ConcurrencyLimiter;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum ManagerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid seed node: {0}")]
    SeedNode(#[from] DirectoryError),
    #[error("could not build node client: {0}")]
    Gateway(#[from] GatewayError),
    #[error("admin listener error: {0}")]
    Admin(#[from] AdminError),
}

/// Serves the Manager API until a listener fails.
pub async fn run(config: Config) -> Result<(), ManagerError> {
    let directory = NodeDirectory::new();
    for seed in &config.nodes {
        directory.upsert(&seed.name, seed.address.clone())?;
    }

    let gateway = HttpNodeGateway::new(directory.clone(), config.fetch_timeout())?;
    let fetcher = AggregationFetcher::new(
        Arc::new(gateway),
        ConcurrencyLimiter::new(config.max_concurrent_fetches),
        config.fetch_timeout(),
    );
    tracing::info!(
        nodes = config.nodes.len(),
        max_concurrent_fetches = config.max_concurrent_fetches,
        "Starting manager"
    );

    // Later cycles are started through the API.
    let initial = fetcher.clone();
    tokio::spawn(async move {
        let view = initial.refresh().await;
        tracing::info!(rows = view.rows.len(), unreachable = view.unreachable.len(), "Initial refresh done");
    });

    let readiness = Readiness::new();
    let api_task = api::serve(
        config.listener,
        AppState { directory, fetcher },
        readiness.clone(),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(readiness),
    );

    tokio::try_join!(
        async { api_task.await.map_err(ManagerError::from) },
        async { admin_task.await.map_err(ManagerError::from) },
    )?;

    Ok(())
}
