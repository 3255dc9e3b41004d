//! Path resolution: directory listings and stat over a flat key space.
//!
//! A name can be backed by an object (`a/b`), by a prefix (`a/b/...`), by
//! both at once, or only by the dummy directory registry. [`TieBreak`]
//! settles the object-vs-prefix ambiguity; the registry fills in directories
//! the store cannot represent.

use std::collections::BTreeMap;
use std::time::SystemTime;

use tracing::trace;

use crate::config::FsConfig;
use crate::dummy_dirs::DummyDirRegistry;
use crate::error::{FsError, Result};
use crate::path::{last_segment, ObjectPath};
use crate::store::{ListOptions, ObjectInfo, ObjectStore};

/// Permission bits reported for directories.
pub const DIR_MODE: u32 = 0o700;
/// Permission bits reported for files.
pub const FILE_MODE: u32 = 0o600;

/// What a resolved name is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A bucket, key prefix, or dummy directory
    Directory,
    /// An object
    File {
        /// Object size in bytes
        size: u64,
    },
}

/// One directory-listing or stat result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Final path segment (empty for the store root)
    pub name: String,
    /// Last modification time
    pub modified: SystemTime,
    /// Directory or file
    pub kind: EntryKind,
}

impl Entry {
    /// A directory entry.
    pub fn directory(name: impl Into<String>, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            modified,
            kind: EntryKind::Directory,
        }
    }

    /// A file entry.
    pub fn file(name: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            modified,
            kind: EntryKind::File { size },
        }
    }

    /// True for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Size in bytes, 0 for directories.
    pub fn size(&self) -> u64 {
        match self.kind {
            EntryKind::Directory => 0,
            EntryKind::File { size } => size,
        }
    }

    /// Unix permission bits.
    pub fn mode(&self) -> u32 {
        if self.is_dir() {
            DIR_MODE
        } else {
            FILE_MODE
        }
    }
}

/// Which interpretation wins when a name is both an object and a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TieBreak {
    prefer_directory: bool,
}

impl TieBreak {
    /// Builds the rule from the `prefer_directory` option.
    pub fn new(prefer_directory: bool) -> Self {
        Self { prefer_directory }
    }

    /// True when `is_dir` is the preferred kind.
    pub fn is_preferred(&self, is_dir: bool) -> bool {
        is_dir == self.prefer_directory
    }

    /// Whether `candidate` should displace `existing` under the same name.
    pub fn replaces(&self, existing: &Entry, candidate: &Entry) -> bool {
        self.is_preferred(candidate.is_dir()) || !self.is_preferred(existing.is_dir())
    }
}

/// How an exact key resolved in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    /// An object stored under exactly the key
    File(ObjectInfo),
    /// At least one key below `key/`
    Directory(ObjectInfo),
}

impl KeyKind {
    /// True for [`KeyKind::Directory`].
    pub fn is_dir(&self) -> bool {
        matches!(self, KeyKind::Directory(_))
    }
}

/// Bytes written through a handle but not yet committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    /// Staged length
    pub size: u64,
    /// When the last byte was staged
    pub modified: SystemTime,
}

/// Looks up `key` in `bucket`, preferring the kind chosen by `tie_break`.
///
/// Scans a non-recursive listing of `key`: an exact match is a file, a key
/// under `key/` is a directory. Stops at the first hit of the preferred kind.
pub async fn lookup_key(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    tie_break: TieBreak,
) -> Result<Option<KeyKind>> {
    let listing = store
        .list_objects(bucket, &ListOptions::with_prefix(key))
        .await?;
    let dir_prefix = format!("{key}/");
    let mut found = None;
    for obj in listing {
        let hit = if obj.key == key {
            KeyKind::File(obj)
        } else if obj.key.starts_with(&dir_prefix) {
            KeyKind::Directory(obj)
        } else {
            continue;
        };
        let preferred = tie_break.is_preferred(hit.is_dir());
        found = Some(hit);
        if preferred {
            break;
        }
    }
    Ok(found)
}

/// Resolves entries for one request against one store client.
pub struct Resolver<'a> {
    store: &'a dyn ObjectStore,
    registry: &'a DummyDirRegistry,
    config: &'a FsConfig,
}

impl<'a> Resolver<'a> {
    /// Binds a resolver to a store client, registry and configuration.
    pub fn new(
        store: &'a dyn ObjectStore,
        registry: &'a DummyDirRegistry,
        config: &'a FsConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    fn tie_break(&self) -> TieBreak {
        TieBreak::new(self.config.prefer_directory)
    }

    /// Lists the immediate children of `path`, at most `limit` from the store (0 = all).
    pub async fn list(&self, path: &ObjectPath, limit: usize) -> Result<Vec<Entry>> {
        let Some(bucket) = path.bucket() else {
            let buckets = self.store.list_buckets().await?;
            return Ok(buckets
                .into_iter()
                .map(|b| Entry::directory(b.name, b.creation_date))
                .collect());
        };

        let prefix = path.child_prefix();
        let listing = self
            .store
            .list_objects(bucket, &ListOptions::with_prefix(prefix.clone()).max_keys(limit))
            .await?;

        let tie_break = self.tie_break();
        let mut entries: BTreeMap<String, Entry> = BTreeMap::new();
        for obj in listing {
            if obj.key == prefix {
                continue;
            }
            let name = last_segment(&obj.key);
            if name.is_empty() {
                continue;
            }
            let candidate = if obj.is_prefix() {
                Entry::directory(name, obj.last_modified)
            } else {
                Entry::file(name, obj.size, obj.last_modified)
            };
            let keep_existing = entries
                .get(name)
                .is_some_and(|existing| !tie_break.replaces(existing, &candidate));
            if !keep_existing {
                entries.insert(name.to_string(), candidate);
            }
        }

        for (name, registered) in self.registry.children(path) {
            entries
                .entry(name.clone())
                .or_insert_with(|| Entry::directory(name, registered));
        }

        trace!(path = %path, count = entries.len(), "listed directory");
        Ok(entries.into_values().collect())
    }

    /// Stats `path`.
    ///
    /// `pending` reports bytes staged by the calling handle, which override
    /// the stored object's size. With `create` set, a missing path is created
    /// as an empty object and resolved again once.
    pub async fn stat(
        &self,
        path: &ObjectPath,
        pending: Option<PendingWrite>,
        create: bool,
    ) -> Result<Entry> {
        let Some(bucket) = path.bucket() else {
            self.store.list_buckets().await?;
            return Ok(Entry::directory("", SystemTime::UNIX_EPOCH));
        };

        if !self.store.bucket_exists(bucket).await? {
            return Err(FsError::not_found(path.to_string()));
        }
        if path.is_bucket() {
            return Ok(Entry::directory(bucket, SystemTime::UNIX_EPOCH));
        }

        let key = path.key();
        let mut create = create;
        loop {
            match lookup_key(self.store, bucket, &key, self.tie_break()).await? {
                Some(KeyKind::Directory(obj)) => {
                    return Ok(Entry::directory(path.name(), obj.last_modified));
                }
                Some(KeyKind::File(obj)) => {
                    return Ok(match pending {
                        Some(staged) => Entry::file(path.name(), staged.size, staged.modified),
                        None => Entry::file(path.name(), obj.size, obj.last_modified),
                    });
                }
                None => {}
            }

            if let Some(registered) = self.registry.modified(path) {
                return Ok(Entry::directory(path.name(), registered));
            }

            if !create {
                return Err(FsError::not_found(path.to_string()));
            }
            if self.config.read_only {
                return Err(FsError::permission_denied("filesystem is read-only"));
            }
            trace!(path = %path, "creating empty object for open with create");
            self.store
                .put_object(bucket, &key, Box::new(tokio::io::empty()), 0)
                .await?;
            create = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_store::{MemoryStore, StoreOp};

    fn p(s: &str) -> ObjectPath {
        ObjectPath::parse(s)
    }

    fn names(entries: &[Entry]) -> Vec<(&str, bool)> {
        entries.iter().map(|e| (e.name.as_str(), e.is_dir())).collect()
    }

    fn config(prefer_directory: bool) -> FsConfig {
        FsConfig {
            prefer_directory,
            ..FsConfig::default()
        }
    }

    #[test]
    fn test_entry_accessors() {
        let dir = Entry::directory("d", SystemTime::UNIX_EPOCH);
        let file = Entry::file("f", 42, SystemTime::UNIX_EPOCH);
        assert!(dir.is_dir());
        assert_eq!(dir.size(), 0);
        assert_eq!(dir.mode(), DIR_MODE);
        assert!(!file.is_dir());
        assert_eq!(file.size(), 42);
        assert_eq!(file.mode(), FILE_MODE);
    }

    #[test]
    fn test_tie_break_prefer_directory() {
        let tb = TieBreak::new(true);
        let dir = Entry::directory("x", SystemTime::UNIX_EPOCH);
        let file = Entry::file("x", 1, SystemTime::UNIX_EPOCH);
        assert!(tb.replaces(&file, &dir));
        assert!(!tb.replaces(&dir, &file));
    }

    #[test]
    fn test_tie_break_prefer_file() {
        let tb = TieBreak::new(false);
        let dir = Entry::directory("x", SystemTime::UNIX_EPOCH);
        let file = Entry::file("x", 1, SystemTime::UNIX_EPOCH);
        assert!(!tb.replaces(&file, &dir));
        assert!(tb.replaces(&dir, &file));
    }

    #[tokio::test]
    async fn test_list_root_returns_buckets() {
        let store = MemoryStore::with_buckets(&["alpha", "beta"]);
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let resolver = Resolver::new(&store, &registry, &cfg);
        let entries = resolver.list(&p("/"), 0).await.unwrap();
        assert_eq!(names(&entries), vec![("alpha", true), ("beta", true)]);
    }

    #[tokio::test]
    async fn test_list_bucket_children() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        store.insert("bkt", "a.txt", "aaa");
        store.insert("bkt", "docs/readme.md", "r");
        store.insert("bkt", "docs/img/logo.png", "l");
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let resolver = Resolver::new(&store, &registry, &cfg);

        let entries = resolver.list(&p("/bkt"), 0).await.unwrap();
        assert_eq!(names(&entries), vec![("a.txt", false), ("docs", true)]);
        assert_eq!(entries[0].size(), 3);

        let entries = resolver.list(&p("/bkt/docs/"), 0).await.unwrap();
        assert_eq!(names(&entries), vec![("img", true), ("readme.md", false)]);
    }

    #[tokio::test]
    async fn test_list_skips_directory_marker() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        store.insert("bkt", "docs/", "");
        store.insert("bkt", "docs/a", "1");
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let resolver = Resolver::new(&store, &registry, &cfg);
        let entries = resolver.list(&p("bkt/docs"), 0).await.unwrap();
        assert_eq!(names(&entries), vec![("a", false)]);
    }

    #[tokio::test]
    async fn test_list_tie_break() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        store.insert("bkt", "both", "file body");
        store.insert("bkt", "both/child", "c");
        let registry = DummyDirRegistry::new();

        let cfg = config(true);
        let entries = Resolver::new(&store, &registry, &cfg)
            .list(&p("bkt"), 0)
            .await
            .unwrap();
        assert_eq!(names(&entries), vec![("both", true)]);

        let cfg = config(false);
        let entries = Resolver::new(&store, &registry, &cfg)
            .list(&p("bkt"), 0)
            .await
            .unwrap();
        assert_eq!(names(&entries), vec![("both", false)]);
    }

    #[tokio::test]
    async fn test_list_unions_dummy_dirs() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        store.insert("bkt", "real.txt", "r");
        store.insert("bkt", "shared", "file");
        let registry = DummyDirRegistry::new();
        registry.add(&p("bkt/empty"));
        registry.add(&p("bkt/shared"));
        let cfg = FsConfig::default();
        let resolver = Resolver::new(&store, &registry, &cfg);
        let entries = resolver.list(&p("bkt"), 0).await.unwrap();
        assert_eq!(
            names(&entries),
            vec![("empty", true), ("real.txt", false), ("shared", false)]
        );
    }

    #[tokio::test]
    async fn test_list_limit() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        for i in 0..10 {
            store.insert("bkt", &format!("f{i}"), "x");
        }
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let resolver = Resolver::new(&store, &registry, &cfg);
        assert_eq!(resolver.list(&p("bkt"), 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_missing_bucket() {
        let store = MemoryStore::new();
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let err = Resolver::new(&store, &registry, &cfg)
            .list(&p("nope"), 0)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stat_root_and_bucket() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let resolver = Resolver::new(&store, &registry, &cfg);
        assert!(resolver.stat(&p("/"), None, false).await.unwrap().is_dir());
        let bucket = resolver.stat(&p("/bkt"), None, false).await.unwrap();
        assert!(bucket.is_dir());
        assert_eq!(bucket.name, "bkt");
        let err = resolver.stat(&p("/other"), None, false).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stat_root_unreachable() {
        let store = MemoryStore::new();
        store.fail_on(
            StoreOp::ListBuckets,
            None,
            crate::store::StoreError::service("AccessDenied", "denied", ""),
        );
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let err = Resolver::new(&store, &registry, &cfg)
            .stat(&p("/"), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_stat_file_and_directory() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        store.insert("bkt", "docs/readme.md", "hello");
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let resolver = Resolver::new(&store, &registry, &cfg);

        let file = resolver.stat(&p("bkt/docs/readme.md"), None, false).await.unwrap();
        assert_eq!(file.kind, EntryKind::File { size: 5 });
        assert_eq!(file.name, "readme.md");

        let dir = resolver.stat(&p("bkt/docs"), None, false).await.unwrap();
        assert!(dir.is_dir());

        let err = resolver.stat(&p("bkt/doc"), None, false).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stat_tie_break() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        store.insert("bkt", "both", "file body");
        store.insert("bkt", "both/child", "c");
        let registry = DummyDirRegistry::new();

        let cfg = config(true);
        let entry = Resolver::new(&store, &registry, &cfg)
            .stat(&p("bkt/both"), None, false)
            .await
            .unwrap();
        assert!(entry.is_dir());

        let cfg = config(false);
        let entry = Resolver::new(&store, &registry, &cfg)
            .stat(&p("bkt/both"), None, false)
            .await
            .unwrap();
        assert_eq!(entry.size(), 9);
    }

    #[tokio::test]
    async fn test_stat_pending_write_overrides_size() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        store.insert("bkt", "f", "");
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let pending = PendingWrite {
            size: 1234,
            modified: SystemTime::UNIX_EPOCH,
        };
        let entry = Resolver::new(&store, &registry, &cfg)
            .stat(&p("bkt/f"), Some(pending), false)
            .await
            .unwrap();
        assert_eq!(entry.size(), 1234);
        assert_eq!(entry.modified, SystemTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn test_stat_dummy_dir() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        let registry = DummyDirRegistry::new();
        registry.add(&p("bkt/empty"));
        let cfg = FsConfig::default();
        let entry = Resolver::new(&store, &registry, &cfg)
            .stat(&p("bkt/empty"), None, false)
            .await
            .unwrap();
        assert!(entry.is_dir());
        assert_eq!(entry.modified, registry.modified(&p("bkt/empty")).unwrap());
    }

    #[tokio::test]
    async fn test_stat_create_intent() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig::default();
        let entry = Resolver::new(&store, &registry, &cfg)
            .stat(&p("bkt/new.txt"), None, true)
            .await
            .unwrap();
        assert_eq!(entry.kind, EntryKind::File { size: 0 });
        assert_eq!(store.contents("bkt", "new.txt").unwrap().len(), 0);
        assert_eq!(store.calls(StoreOp::PutObject), 1);
    }

    #[tokio::test]
    async fn test_stat_create_intent_read_only() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        let registry = DummyDirRegistry::new();
        let cfg = FsConfig {
            read_only: true,
            ..FsConfig::default()
        };
        let err = Resolver::new(&store, &registry, &cfg)
            .stat(&p("bkt/new.txt"), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::PermissionDenied { .. }));
        assert_eq!(store.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_stat_is_idempotent() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        store.insert("bkt", "a/b", "data");
        let registry = DummyDirRegistry::new();
        registry.add(&p("bkt/empty"));
        let cfg = FsConfig::default();
        let resolver = Resolver::new(&store, &registry, &cfg);
        for path in ["/", "bkt", "bkt/a", "bkt/a/b", "bkt/empty"] {
            let first = resolver.stat(&p(path), None, false).await.unwrap();
            let second = resolver.stat(&p(path), None, false).await.unwrap();
            assert_eq!(first, second, "{path}");
        }
    }

    #[tokio::test]
    async fn test_lookup_ignores_sibling_with_shared_prefix() {
        let store = MemoryStore::with_buckets(&["bkt"]);
        store.insert("bkt", "ab", "x");
        store.insert("bkt", "a.txt", "y");
        assert_eq!(
            lookup_key(&store, "bkt", "a", TieBreak::new(true)).await.unwrap(),
            None
        );
    }
}
