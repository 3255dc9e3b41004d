//! Gateway configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindAddr {
    pub addr: String,
    pub port: u16,
}

impl BindAddr {
    pub fn new(addr: &str, port: u16) -> Self {
        Self {
            addr: addr.to_string(),
            port,
        }
    }

    pub fn webdav_default() -> Self {
        Self {
            addr: "0.0.0.0".to_string(),
            port: 8080,
        }
    }

    pub fn to_socket_addr_string(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

impl Default for BindAddr {
    fn default() -> Self {
        Self::webdav_default()
    }
}

/// Where the S3-compatible store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEndpoint {
    pub endpoint: String,
    pub region: String,
    pub secure: bool,
}

impl Default for StoreEndpoint {
    fn default() -> Self {
        Self {
            endpoint: "localhost:9000".to_string(),
            region: String::new(),
            secure: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl TlsConfig {
    pub fn enabled(&self) -> bool {
        self.cert.is_some() && self.key.is_some()
    }
}

/// Where written bytes wait until the file handle is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StagingMode {
    /// Keep staged bytes in memory
    #[default]
    Memory,
    /// Move staged bytes to an anonymous temporary file once they exceed `threshold`
    Spill { threshold: u64 },
}

/// Options consumed by the filesystem layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Resolve a name that is both an object and a prefix as a directory
    pub prefer_directory: bool,
    /// Permit creating and removing buckets through MKCOL/DELETE at depth 1
    pub allow_bucket_ops: bool,
    /// Refuse every mutating operation
    pub read_only: bool,
    pub staging: StagingMode,
    /// Upper bound on concurrent object deletions during a recursive delete
    pub delete_concurrency: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            prefer_directory: true,
            allow_bucket_ops: false,
            read_only: false,
            staging: StagingMode::Memory,
            delete_concurrency: 16,
        }
    }
}

impl FsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.delete_concurrency == 0 {
            return Err(FsError::invalid_argument(
                "delete_concurrency must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: BindAddr,
    pub store: StoreEndpoint,
    pub tls: TlsConfig,
    pub fs: FsConfig,
    pub verbose: bool,
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.endpoint.is_empty() {
            return Err(FsError::invalid_argument("store endpoint cannot be empty"));
        }

        if self.tls.cert.is_some() != self.tls.key.is_some() {
            return Err(FsError::invalid_argument(
                "TLS needs both a certificate and a key",
            ));
        }

        self.fs.validate()
    }
}
