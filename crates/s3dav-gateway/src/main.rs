#![warn(missing_docs)]

//! s3dav: serves an S3-compatible object store as a WebDAV filesystem

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use s3dav_gateway::cli::Cli;
use s3dav_gateway::{EntryResolver, GatewayConfig, MemoryStore, ObjectFs, ObjectStore};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    let config = cli.apply(file_config);

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    tracing::info!("s3dav gateway starting...");
    config.validate()?;

    tracing::info!(
        listen = %config.bind.to_socket_addr_string(),
        endpoint = %config.store.endpoint,
        region = %config.store.region,
        secure = config.store.secure,
        tls = config.tls.enabled(),
        prefer_directory = config.fs.prefer_directory,
        allow_bucket_ops = config.fs.allow_bucket_ops,
        read_only = config.fs.read_only,
        staging = ?config.fs.staging,
        "effective configuration"
    );

    let fs = ObjectFs::new(config.fs.clone());
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let root = fs.readdir(&store, "/", 0).await?;
    tracing::info!(buckets = root.len(), "filesystem ready");

    Ok(())
}
