//! Hierarchical path to bucket/key translation

use std::fmt;

/// A parsed filesystem path: bucket name followed by key segments.
///
/// Leading, trailing and repeated separators are dropped, so `"/a//b/"` and
/// `"a/b"` are the same path. Zero segments denote the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ObjectPath {
    segments: Vec<String>,
}

impl ObjectPath {
    /// Parses a slash-delimited path.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Builds a path from already-split segments, dropping empty ones.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True for the store root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True for a bucket-only path.
    pub fn is_bucket(&self) -> bool {
        self.segments.len() == 1
    }

    /// Segments of the path.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Bucket name, absent at the root.
    pub fn bucket(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Object key: segments after the bucket joined by `/`. Empty for root and buckets.
    pub fn key(&self) -> String {
        self.segments.get(1..).map(|s| s.join("/")).unwrap_or_default()
    }

    /// Key prefix addressing the children of this path, `key + "/"`, or empty for a bucket.
    pub fn child_prefix(&self) -> String {
        let key = self.key();
        if key.is_empty() {
            key
        } else {
            key + "/"
        }
    }

    /// Last segment, empty at the root.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// The path truncated to its first `depth` segments.
    pub fn ancestor(&self, depth: usize) -> ObjectPath {
        Self {
            segments: self.segments[..depth.min(self.segments.len())].to_vec(),
        }
    }

    /// Parent path; the root is its own parent.
    pub fn parent(&self) -> ObjectPath {
        self.ancestor(self.depth().saturating_sub(1))
    }

    /// Appends one segment.
    pub fn join(&self, segment: &str) -> ObjectPath {
        let mut segments = self.segments.clone();
        segments.extend(segment.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        Self { segments }
    }

    /// Full `bucket/key` string used by the dummy directory registry.
    pub fn registry_key(&self) -> String {
        self.segments.join("/")
    }

    /// True when `other` lies strictly below this path.
    pub fn is_ancestor_of(&self, other: &ObjectPath) -> bool {
        other.depth() > self.depth() && other.segments[..self.depth()] == self.segments[..]
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl From<&str> for ObjectPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// Returns the last non-empty segment of an object key.
pub fn last_segment(key: &str) -> &str {
    key.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
}
