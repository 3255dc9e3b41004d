//! Namespace mutations: mkdir, recursive remove and rename.
//!
//! These operate on whole subtrees of the flat key space and keep the dummy
//! directory registry in step with what the store can show.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::config::FsConfig;
use crate::dummy_dirs::DummyDirRegistry;
use crate::error::{FsError, Result};
use crate::path::ObjectPath;
use crate::resolver::{lookup_key, KeyKind, TieBreak};
use crate::store::{ListOptions, ObjectStore, StoreError};

/// Subtree operations bound to one store client.
pub struct TreeOps<'a> {
    store: &'a Arc<dyn ObjectStore>,
    registry: &'a DummyDirRegistry,
    config: &'a FsConfig,
}

impl<'a> TreeOps<'a> {
    /// Binds the operations to a store client, registry and configuration.
    pub fn new(
        store: &'a Arc<dyn ObjectStore>,
        registry: &'a DummyDirRegistry,
        config: &'a FsConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.config.read_only {
            return Err(FsError::permission_denied("filesystem is read-only"));
        }
        Ok(())
    }

    fn check_bucket_ops(&self, path: &ObjectPath) -> Result<()> {
        if !self.config.allow_bucket_ops {
            return Err(FsError::permission_denied(format!(
                "bucket operations are disabled ({path})"
            )));
        }
        Ok(())
    }

    /// Creates a directory.
    ///
    /// At depth 1 this creates a bucket. Below that every level without
    /// store content is registered as a dummy directory. A level that is
    /// already an object is never registered.
    pub async fn mkdir(&self, path: &ObjectPath) -> Result<()> {
        self.check_writable()?;
        let Some(bucket) = path.bucket() else {
            return Err(FsError::invalid_argument("cannot create the root"));
        };
        if path.is_bucket() {
            self.check_bucket_ops(path)?;
            debug!(bucket, "creating bucket");
            self.store.make_bucket(bucket).await?;
            return Ok(());
        }

        if !self.store.bucket_exists(bucket).await? {
            return Err(FsError::not_found(bucket));
        }
        let tie_break = TieBreak::new(self.config.prefer_directory);
        for depth in (2..=path.depth()).rev() {
            let level = path.ancestor(depth);
            if lookup_key(self.store.as_ref(), bucket, &level.key(), tie_break)
                .await?
                .is_some()
            {
                // Everything above a level with content has content too.
                break;
            }
            self.registry.add(&level);
        }
        Ok(())
    }

    /// Removes `path` and everything below it.
    pub async fn remove_all(&self, path: &ObjectPath) -> Result<()> {
        self.check_writable()?;
        let Some(bucket) = path.bucket() else {
            return Err(FsError::invalid_argument("cannot remove the root"));
        };
        if path.is_bucket() {
            self.check_bucket_ops(path)?;
            debug!(bucket, "removing bucket");
            self.store.remove_bucket(bucket).await?;
            self.registry.remove_tree(path);
            return Ok(());
        }

        let key = path.key();
        let tie_break = TieBreak::new(self.config.prefer_directory);
        let Some(found) = lookup_key(self.store.as_ref(), bucket, &key, tie_break).await? else {
            return self.remove_dummy(bucket, path).await;
        };

        self.promote_ancestors(path).await?;
        match found {
            KeyKind::Directory(_) => {
                let listing = self
                    .store
                    .list_objects(bucket, &ListOptions::with_prefix(path.child_prefix()).recursive())
                    .await?;
                let keys: Vec<String> = listing.into_iter().map(|obj| obj.key).collect();
                debug!(bucket, key = %key, objects = keys.len(), "removing directory");
                self.delete_objects(bucket, keys).await?;
            }
            KeyKind::File(_) => {
                debug!(bucket, key = %key, "removing object");
                self.store.remove_object(bucket, &key).await?;
            }
        }
        self.registry.remove_tree(path);
        Ok(())
    }

    /// Removes a directory that exists only in the registry.
    ///
    /// Drops the entry and its registered descendants, then every registered
    /// ancestor left with neither dummy children nor store content.
    async fn remove_dummy(&self, bucket: &str, path: &ObjectPath) -> Result<()> {
        if !self.registry.contains(path) {
            return Err(FsError::not_found(path.to_string()));
        }
        self.registry.remove_tree(path);
        for depth in (2..path.depth()).rev() {
            let level = path.ancestor(depth);
            if !self.registry.contains(&level) || !self.registry.children(&level).is_empty() {
                break;
            }
            let listing = self
                .store
                .list_objects(bucket, &ListOptions::with_prefix(level.child_prefix()).max_keys(1))
                .await?;
            if !listing.is_empty() {
                break;
            }
            trace!(dir = %level, "dropping emptied dummy directory");
            self.registry.remove(&level);
        }
        Ok(())
    }

    /// Registers each ancestor of `path` below the bucket that would be left
    /// without content once `path` is gone.
    ///
    /// Walks upward from the parent and stops at the first level that keeps
    /// other content.
    async fn promote_ancestors(&self, path: &ObjectPath) -> Result<()> {
        let Some(bucket) = path.bucket() else {
            return Ok(());
        };
        let doomed = path.child_prefix();
        for depth in (2..path.depth()).rev() {
            let level = path.ancestor(depth);
            let listing = self
                .store
                .list_objects(bucket, &ListOptions::with_prefix(level.child_prefix()))
                .await?;
            let keeps_content = listing
                .iter()
                .any(|obj| obj.key != level.child_prefix() && !doomed.starts_with(&obj.key));
            if keeps_content {
                break;
            }
            trace!(dir = %level, "keeping emptied directory");
            self.registry.add(&level);
        }
        Ok(())
    }

    /// Deletes `keys` concurrently, at most `delete_concurrency` at a time.
    ///
    /// Returns the first failure. Deletions already in flight finish on their
    /// own; no new ones start after a failure.
    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<()> {
        let limit = Arc::new(Semaphore::new(self.config.delete_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for key in keys {
            let Ok(permit) = limit.clone().acquire_owned().await else {
                break;
            };
            let store = self.store.clone();
            let bucket = bucket.to_string();
            let limit = limit.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = store.remove_object(&bucket, &key).await;
                if result.is_err() {
                    limit.close();
                }
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| StoreError::Transport {
                reason: format!("delete task failed: {e}"),
            });
            if let Err(e) = outcome.and_then(|r| r) {
                tasks.detach_all();
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Moves `old` to `new`.
    ///
    /// Pure dummy directories move inside the registry only. Objects are copied,
    /// then the originals are deleted; a failed copy leaves the source
    /// untouched.
    pub async fn rename(&self, old: &ObjectPath, new: &ObjectPath) -> Result<()> {
        self.check_writable()?;
        let (Some(old_bucket), Some(new_bucket)) = (old.bucket(), new.bucket()) else {
            return Err(FsError::invalid_argument("cannot rename the root"));
        };
        if old.depth() < 2 || new.depth() < 2 {
            return Err(FsError::invalid_argument(format!(
                "cannot rename {old} to {new}: buckets cannot be renamed"
            )));
        }
        let was_dummy = self.registry.rename_tree(old, new);

        let old_key = old.key();
        let new_key = new.key();
        let tie_break = TieBreak::new(self.config.prefer_directory);
        let found = lookup_key(self.store.as_ref(), old_bucket, &old_key, tie_break).await?;
        match found {
            None if was_dummy => {
                trace!(from = %old, to = %new, "renamed dummy directory");
                return Ok(());
            }
            None => return Err(FsError::not_found(old.to_string())),
            Some(KeyKind::File(_)) => {
                debug!(from = %old, to = %new, "renaming object");
                self.store
                    .copy_object(old_bucket, &old_key, new_bucket, &new_key)
                    .await?;
                self.promote_ancestors(old).await?;
                self.store.remove_object(old_bucket, &old_key).await?;
            }
            Some(KeyKind::Directory(_)) => {
                let old_prefix = old.child_prefix();
                let new_prefix = new.child_prefix();
                let listing = self
                    .store
                    .list_objects(old_bucket, &ListOptions::with_prefix(old_prefix.clone()).recursive())
                    .await?;
                let keys: Vec<String> = listing.into_iter().map(|obj| obj.key).collect();
                debug!(from = %old, to = %new, objects = keys.len(), "renaming directory");
                for key in &keys {
                    let target = format!("{}{}", new_prefix, &key[old_prefix.len()..]);
                    self.store
                        .copy_object(old_bucket, key, new_bucket, &target)
                        .await?;
                }
                self.promote_ancestors(old).await?;
                self.delete_objects(old_bucket, keys).await?;
            }
        }
        self.registry.clear_lineage(new);
        Ok(())
    }
}
