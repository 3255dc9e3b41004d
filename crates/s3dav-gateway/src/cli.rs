//! Command-line interface of the `s3dav` binary

use std::path::PathBuf;

use clap::Parser;

use crate::config::{GatewayConfig, StagingMode};

/// Flags of the `s3dav` binary.
#[derive(Parser, Debug)]
#[command(name = "s3dav")]
#[command(about = "Serve an S3-compatible object store as a WebDAV filesystem", long_about = None)]
pub struct Cli {
    /// TOML or JSON configuration file; flags override its values
    #[arg(long, env = "S3DAV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Object store endpoint (host:port)
    #[arg(short, long, env = "S3DAV_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Object store region
    #[arg(short, long)]
    pub region: Option<String>,

    /// Use TLS towards the object store
    #[arg(short, long)]
    pub secure: bool,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Resolve names that are both an object and a prefix as directories
    #[arg(short = 'd', long, value_name = "BOOL")]
    pub prefer_directory: Option<bool>,

    /// Allow creating and removing buckets
    #[arg(short = 'b', long = "allow-buckets-ops")]
    pub allow_bucket_ops: bool,

    /// Refuse every mutating request
    #[arg(long)]
    pub read_only: bool,

    /// Stage uploads larger than this many bytes in a temporary file
    #[arg(long, value_name = "BYTES")]
    pub spill_threshold: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// TLS certificate for the WebDAV listener
    #[arg(short = 'c', long)]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key for the WebDAV listener
    #[arg(short = 'k', long)]
    pub tls_key: Option<PathBuf>,
}

impl Cli {
    /// Overlays the flags that were given on `config`.
    pub fn apply(&self, mut config: GatewayConfig) -> GatewayConfig {
        if let Some(endpoint) = &self.endpoint {
            config.store.endpoint = endpoint.clone();
        }
        if let Some(region) = &self.region {
            config.store.region = region.clone();
        }
        if let Some(port) = self.port {
            config.bind.port = port;
        }
        if let Some(prefer) = self.prefer_directory {
            config.fs.prefer_directory = prefer;
        }
        if let Some(threshold) = self.spill_threshold {
            config.fs.staging = StagingMode::Spill { threshold };
        }
        if self.tls_cert.is_some() {
            config.tls.cert = self.tls_cert.clone();
        }
        if self.tls_key.is_some() {
            config.tls.key = self.tls_key.clone();
        }
        config.store.secure |= self.secure;
        config.fs.allow_bucket_ops |= self.allow_bucket_ops;
        config.fs.read_only |= self.read_only;
        config.verbose |= self.verbose;
        config
    }
}
