use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use fs_object_store::{
    config::AppConfig, routes::routes::routes, services::checksum::ChecksumIndex,
    services::storage_service::StorageService,
};
use std::{fs, io::ErrorKind};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::parse();

    tracing::info!("Starting fs-object-store with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !cfg.storage_dir.exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir.display());
    }

    // --- Open the checksum index ---
    if let Some(parent) = cfg.sqlite_path().and_then(|p| p.parent()) {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    tracing::debug!("Connecting checksum index => {}", cfg.database_url);
    let index = ChecksumIndex::connect(&cfg.database_url)
        .await
        .with_context(|| format!("opening checksum index `{}`", cfg.database_url))?;

    // The schema is idempotent, so it is applied on every start.
    index.migrate().await.context("creating checksum index schema")?;
    if cfg.migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let storage = StorageService::open(index, &cfg.storage_dir)
        .await
        .with_context(|| format!("opening storage root `{}`", cfg.storage_dir.display()))?;
    tracing::info!("Serving objects from {}", storage.root.display());

    // --- Build router ---
    let app: Router = routes().with_state(storage);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
