//! Registry of synthetic ("dummy") directories.
//!
//! Object stores cannot represent an empty directory. A directory created by
//! an empty MKCOL, or left behind when its last object was deleted, is
//! remembered here instead, keyed by its full `bucket/key` string. The
//! registry is in-memory only and does not survive a restart.
//!
//! Membership tests are exact; listing, cascade delete and rename work on
//! whole-segment prefixes, so `b/x` never matches `b/xy`.

use std::collections::BTreeMap;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::trace;

use crate::path::ObjectPath;

fn is_within(key: &str, base: &str) -> bool {
    key == base || (key.starts_with(base) && key.as_bytes().get(base.len()) == Some(&b'/'))
}

/// Shared set of dummy directory paths with their registration times.
///
/// Every method takes the lock once, so each read-modify-write is atomic
/// with respect to other callers.
#[derive(Debug, Default)]
pub struct DummyDirRegistry {
    dirs: RwLock<BTreeMap<String, SystemTime>>,
}

impl DummyDirRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` as a dummy directory. Returns false if it already was one.
    pub fn add(&self, path: &ObjectPath) -> bool {
        let key = path.registry_key();
        let mut dirs = self.dirs.write();
        if dirs.contains_key(&key) {
            return false;
        }
        trace!(dir = %key, "registering dummy directory");
        dirs.insert(key, SystemTime::now());
        true
    }

    /// Exact membership test.
    pub fn contains(&self, path: &ObjectPath) -> bool {
        self.dirs.read().contains_key(&path.registry_key())
    }

    /// Registration time of an exact entry.
    pub fn modified(&self, path: &ObjectPath) -> Option<SystemTime> {
        self.dirs.read().get(&path.registry_key()).copied()
    }

    /// Immediate child directory names below `path`, with their registration times.
    ///
    /// A deeper entry such as `b/x/y/z` still yields `y` when listing `b/x`.
    pub fn children(&self, path: &ObjectPath) -> Vec<(String, SystemTime)> {
        if path.is_root() {
            return Vec::new();
        }
        let prefix = format!("{}/", path.registry_key());
        let dirs = self.dirs.read();
        let mut children: BTreeMap<String, SystemTime> = BTreeMap::new();
        for (key, registered) in dirs
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
        {
            let rest = &key[prefix.len()..];
            let (name, is_direct) = match rest.split_once('/') {
                Some((name, _)) => (name, false),
                None => (rest, true),
            };
            if name.is_empty() {
                continue;
            }
            if is_direct || !children.contains_key(name) {
                children.insert(name.to_string(), *registered);
            }
        }
        children.into_iter().collect()
    }

    /// Removes the exact entry for `path`. Returns false if it was not registered.
    pub fn remove(&self, path: &ObjectPath) -> bool {
        self.dirs.write().remove(&path.registry_key()).is_some()
    }

    /// Removes `path` and every entry below it. Returns how many entries went away.
    pub fn remove_tree(&self, path: &ObjectPath) -> usize {
        let base = path.registry_key();
        let mut dirs = self.dirs.write();
        let before = dirs.len();
        dirs.retain(|key, _| !is_within(key, &base));
        let removed = before - dirs.len();
        if removed > 0 {
            trace!(dir = %base, removed, "purged dummy directories");
        }
        removed
    }

    /// Moves `old` and every entry below it under `new`, keeping registration times.
    ///
    /// Returns true when `old` itself was a dummy directory.
    pub fn rename_tree(&self, old: &ObjectPath, new: &ObjectPath) -> bool {
        let old_base = old.registry_key();
        let new_base = new.registry_key();
        let mut dirs = self.dirs.write();
        let moved: Vec<(String, SystemTime)> = dirs
            .iter()
            .filter(|(key, _)| is_within(key, &old_base))
            .map(|(key, time)| (key.clone(), *time))
            .collect();
        let exact = dirs.contains_key(&old_base);
        for (key, time) in moved {
            dirs.remove(&key);
            let renamed = format!("{}{}", new_base, &key[old_base.len()..]);
            dirs.insert(renamed, time);
        }
        if exact {
            trace!(from = %old_base, to = %new_base, "renamed dummy directory");
        }
        exact
    }

    /// Drops `path` and each of its ancestors below the bucket.
    ///
    /// Called once real content exists at `path`, which makes every level
    /// above it visible through the store.
    pub fn clear_lineage(&self, path: &ObjectPath) {
        let mut dirs = self.dirs.write();
        for depth in 2..=path.depth() {
            dirs.remove(&path.ancestor(depth).registry_key());
        }
    }

    /// Number of registered directories.
    pub fn len(&self) -> usize {
        self.dirs.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.dirs.read().is_empty()
    }

    /// Sorted copy of every registered `bucket/key`.
    pub fn snapshot(&self) -> Vec<String> {
        self.dirs.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(s: &str) -> ObjectPath {
        ObjectPath::parse(s)
    }

    #[test]
    fn test_add_and_contains() {
        let reg = DummyDirRegistry::new();
        assert!(reg.add(&p("b/x")));
        assert!(!reg.add(&p("b/x")));
        assert!(reg.contains(&p("/b/x/")));
        assert!(!reg.contains(&p("b")));
        assert!(!reg.contains(&p("b/x/y")));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_add_keeps_original_time() {
        let reg = DummyDirRegistry::new();
        reg.add(&p("b/x"));
        let first = reg.modified(&p("b/x"));
        reg.add(&p("b/x"));
        assert_eq!(reg.modified(&p("b/x")), first);
    }

    #[test]
    fn test_children_immediate_only() {
        let reg = DummyDirRegistry::new();
        reg.add(&p("b/x"));
        reg.add(&p("b/x/y"));
        reg.add(&p("b/x/y/z"));
        reg.add(&p("b/x/w"));
        reg.add(&p("b/xy"));
        let names: Vec<String> = reg.children(&p("b/x")).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["w".to_string(), "y".to_string()]);
        let names: Vec<String> = reg.children(&p("b")).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["x".to_string(), "xy".to_string()]);
    }

    #[test]
    fn test_children_from_deeper_entry() {
        let reg = DummyDirRegistry::new();
        reg.add(&p("b/x/y/z"));
        let names: Vec<String> = reg.children(&p("b/x")).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["y".to_string()]);
    }

    #[test]
    fn test_children_at_root_is_empty() {
        let reg = DummyDirRegistry::new();
        reg.add(&p("b/x"));
        assert!(reg.children(&p("/")).is_empty());
    }

    #[test]
    fn test_remove_tree_respects_segment_boundary() {
        let reg = DummyDirRegistry::new();
        reg.add(&p("b/x"));
        reg.add(&p("b/x/y"));
        reg.add(&p("b/xy"));
        assert_eq!(reg.remove_tree(&p("b/x")), 2);
        assert_eq!(reg.snapshot(), vec!["b/xy".to_string()]);
    }

    #[test]
    fn test_remove_exact_only() {
        let reg = DummyDirRegistry::new();
        reg.add(&p("b/x"));
        reg.add(&p("b/x/y"));
        assert!(reg.remove(&p("b/x")));
        assert!(!reg.remove(&p("b/x")));
        assert_eq!(reg.snapshot(), vec!["b/x/y".to_string()]);
    }

    #[test]
    fn test_remove_tree_missing() {
        let reg = DummyDirRegistry::new();
        assert_eq!(reg.remove_tree(&p("b/x")), 0);
    }

    #[test]
    fn test_rename_tree() {
        let reg = DummyDirRegistry::new();
        reg.add(&p("b/x"));
        reg.add(&p("b/x/y"));
        reg.add(&p("b/xy"));
        assert!(reg.rename_tree(&p("b/x"), &p("c/new")));
        assert_eq!(
            reg.snapshot(),
            vec![
                "b/xy".to_string(),
                "c/new".to_string(),
                "c/new/y".to_string()
            ]
        );
    }

    #[test]
    fn test_rename_tree_without_exact_entry() {
        let reg = DummyDirRegistry::new();
        reg.add(&p("b/x/y"));
        assert!(!reg.rename_tree(&p("b/x"), &p("b/z")));
        assert_eq!(reg.snapshot(), vec!["b/z/y".to_string()]);
    }

    #[test]
    fn test_clear_lineage() {
        let reg = DummyDirRegistry::new();
        reg.add(&p("b/x"));
        reg.add(&p("b/x/y"));
        reg.add(&p("b/x/y/z"));
        reg.add(&p("b/x/w"));
        reg.clear_lineage(&p("b/x/y/file.txt"));
        assert_eq!(
            reg.snapshot(),
            vec!["b/x/w".to_string(), "b/x/y/z".to_string()]
        );
    }

    proptest! {
        #[test]
        fn prop_remove_tree_leaves_nothing_below(
            names in proptest::collection::vec("[ab]{1,2}(/[ab]{1,2}){0,3}", 1..20),
            target in "[ab]{1,2}",
        ) {
            let reg = DummyDirRegistry::new();
            for name in &names {
                reg.add(&p(&format!("bk/{name}")));
            }
            let base = p(&format!("bk/{target}"));
            reg.remove_tree(&base);
            for key in reg.snapshot() {
                prop_assert!(!is_within(&key, &base.registry_key()));
            }
        }

        #[test]
        fn prop_rename_preserves_count(
            names in proptest::collection::vec("[ab]{1,2}(/[ab]{1,2}){0,3}", 1..20),
        ) {
            let reg = DummyDirRegistry::new();
            for name in &names {
                reg.add(&p(&format!("bk/{name}")));
            }
            let before = reg.len();
            reg.rename_tree(&p("bk/a"), &p("other/c"));
            prop_assert_eq!(reg.len(), before);
        }
    }
}
