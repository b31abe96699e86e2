pub mod api; // HTTP + WebSocket surface
pub mod config;
pub mod db;
pub mod models;
pub mod realtime; // Change events, tenant filter, subscriptions, typing
pub mod scheduling; // Recurrence resolution + task materialization
pub mod service;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::ServiceConfig;
use crate::service::{CareService, ServiceError};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Cannot create data directory {path}: {source}")]
    DataDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Server(#[from] api::ServerError),
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(std::io::Error),
}

/// Run the service until Ctrl-C: open the database, start realtime
/// delivery, serve the API.
pub async fn run() -> Result<(), StartupError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = ServiceConfig::from_env();
    if let Some(dir) = config.database_path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|source| StartupError::DataDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
    }
    tracing::info!(db = %config.database_path.display(), "Opening database");

    let bind_addr = config.bind_addr;
    let service = Arc::new(CareService::from_config(config)?);
    service.open();

    let server = api::start_server_on(service.clone(), bind_addr).await?;
    tracing::info!(addr = %server.local_addr(), "Listening");

    tokio::signal::ctrl_c().await.map_err(StartupError::Signal)?;
    tracing::info!("Shutdown requested");

    server.stop().await;
    service.close();
    Ok(())
}
