pub mod announce;
pub mod api;
pub mod config;
pub mod health;
pub mod metrics_defs;
pub mod registry;
pub mod store;
pub mod types;

use crate::config::Config;
use crate::health::{HealthCheckError, ManagerHealthCheck};
use crate::registry::FeatureRegistry;
use shared::admin_service::{AdminError, AdminService, Readiness};
use shared::http::run_http_service;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
    #[error("admin listener error: {0}")]
    Admin(#[from] AdminError),
    #[error("manager health check: {0}")]
    HealthCheck(#[from] HealthCheckError),
}

/// Serves the feature registry of one environment until a listener fails.
pub async fn run(config: Config) -> Result<(), NodeError> {
    let store = store::get_store(&config.store)?;
    let registry = Arc::new(FeatureRegistry::new(config.environment.clone(), store));
    tracing::info!(environment = %config.environment, "Starting node");

    let readiness = Readiness::new();
    let mut admin_service = AdminService::new(readiness.clone());
    if let Some(url) = config.manager.as_ref().and_then(|manager| manager.url.as_ref()) {
        admin_service = admin_service.with_check(Arc::new(ManagerHealthCheck::new(url)?));
    }

    let api_task = api::serve(config.listener, registry, readiness);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::spawn(announce::announce_node(config.manager));

    tokio::try_join!(
        async { api_task.await.map_err(NodeError::from) },
        async { admin_task.await.map_err(NodeError::from) },
    )?;

    Ok(())
}
