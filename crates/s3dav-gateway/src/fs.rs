//! Filesystem facade consumed by the WebDAV front end.
//!
//! [`ObjectFs`] owns the dummy directory registry and the filesystem options.
//! Every call takes the store client of the current request, so one
//! `ObjectFs` can serve many sessions with different credentials.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::FsConfig;
use crate::dummy_dirs::DummyDirRegistry;
use crate::error::Result;
use crate::file::{FileHandle, OpenFlags};
use crate::path::ObjectPath;
use crate::resolver::{Entry, Resolver};
use crate::store::ObjectStore;
use crate::tree_ops::TreeOps;

/// Read-only name resolution.
#[async_trait]
pub trait EntryResolver: Send + Sync {
    /// Stats a single path.
    async fn stat(&self, store: &Arc<dyn ObjectStore>, path: &str) -> Result<Entry>;

    /// Lists the children of a directory, at most `limit` from the store (0 = all).
    async fn readdir(
        &self,
        store: &Arc<dyn ObjectStore>,
        path: &str,
        limit: usize,
    ) -> Result<Vec<Entry>>;
}

/// Opens file handles.
pub trait HandleProvider: Send + Sync {
    /// Creates a handle bound to `path`. Does not touch the store.
    fn open(&self, store: Arc<dyn ObjectStore>, path: &str, flags: OpenFlags) -> FileHandle;
}

/// S3-backed filesystem.
#[derive(Debug, Default)]
pub struct ObjectFs {
    registry: Arc<DummyDirRegistry>,
    config: Arc<FsConfig>,
}

impl ObjectFs {
    /// Creates a filesystem with an empty registry.
    pub fn new(config: FsConfig) -> Self {
        Self {
            registry: Arc::new(DummyDirRegistry::new()),
            config: Arc::new(config),
        }
    }

    /// The dummy directory registry shared by all handles of this filesystem.
    pub fn registry(&self) -> &DummyDirRegistry {
        &self.registry
    }

    /// Active options.
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    fn tree<'a>(&'a self, store: &'a Arc<dyn ObjectStore>) -> TreeOps<'a> {
        TreeOps::new(store, &self.registry, &self.config)
    }

    /// Creates a directory, or a bucket at depth 1 when bucket operations are allowed.
    pub async fn mkdir(&self, store: &Arc<dyn ObjectStore>, path: &str) -> Result<()> {
        debug!(path, "mkdir");
        self.tree(store).mkdir(&ObjectPath::parse(path)).await
    }

    /// Removes a file or directory tree, or an empty bucket when bucket operations are allowed.
    pub async fn remove_all(&self, store: &Arc<dyn ObjectStore>, path: &str) -> Result<()> {
        debug!(path, "remove_all");
        self.tree(store).remove_all(&ObjectPath::parse(path)).await
    }

    /// Renames a file or directory tree.
    pub async fn rename(&self, store: &Arc<dyn ObjectStore>, old: &str, new: &str) -> Result<()> {
        debug!(old, new, "rename");
        self.tree(store)
            .rename(&ObjectPath::parse(old), &ObjectPath::parse(new))
            .await
    }
}

#[async_trait]
impl EntryResolver for ObjectFs {
    async fn stat(&self, store: &Arc<dyn ObjectStore>, path: &str) -> Result<Entry> {
        debug!(path, "stat");
        Resolver::new(store.as_ref(), &self.registry, &self.config)
            .stat(&ObjectPath::parse(path), None, false)
            .await
    }

    async fn readdir(
        &self,
        store: &Arc<dyn ObjectStore>,
        path: &str,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        debug!(path, limit, "readdir");
        Resolver::new(store.as_ref(), &self.registry, &self.config)
            .list(&ObjectPath::parse(path), limit)
            .await
    }
}

impl HandleProvider for ObjectFs {
    fn open(&self, store: Arc<dyn ObjectStore>, path: &str, flags: OpenFlags) -> FileHandle {
        debug!(path, flags = flags.bits(), "open");
        FileHandle::open(
            ObjectPath::parse(path),
            store,
            self.registry.clone(),
            self.config.clone(),
            flags,
        )
    }
}
