//! Object store client seam.
//!
//! The filesystem layer never speaks an object-store wire protocol itself. It
//! drives an [`ObjectStore`] handed in per request (one client per
//! authenticated session) and classifies the [`StoreError`]s it gets back.

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

/// Service error codes meaning "the bucket or object does not exist".
const NOT_FOUND_CODES: &[&str] = &["NoSuchBucket", "NoSuchKey", "NotFound"];

/// Service error codes meaning the credentials were rejected.
const AUTH_FAILURE_CODES: &[&str] = &["SignatureDoesNotMatch", "InvalidAccessKeyId", "AccessDenied"];

/// Failure reported by an object store client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The service answered with an error code.
    #[error("{code}: {message} ({resource})")]
    Service {
        /// Service error code, e.g. `NoSuchKey`
        code: String,
        /// Human-readable message from the service
        message: String,
        /// Bucket or `bucket/key` the request addressed
        resource: String,
    },
    /// The request never got a service answer.
    #[error("transport error: {reason}")]
    Transport {
        /// What went wrong on the wire
        reason: String,
    },
}

impl StoreError {
    /// Builds a [`StoreError::Service`].
    pub fn service(
        code: impl Into<String>,
        message: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        StoreError::Service {
            code: code.into(),
            message: message.into(),
            resource: resource.into(),
        }
    }

    /// Service error code, if the service answered.
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Service { code, .. } => Some(code),
            StoreError::Transport { .. } => None,
        }
    }

    /// The addressed resource, if known.
    pub fn resource(&self) -> Option<&str> {
        match self {
            StoreError::Service { resource, .. } => Some(resource),
            StoreError::Transport { .. } => None,
        }
    }

    /// Missing bucket or key.
    pub fn is_not_found(&self) -> bool {
        self.code().is_some_and(|c| NOT_FOUND_CODES.contains(&c))
    }

    /// Request refused for lack of rights.
    pub fn is_permission(&self) -> bool {
        self.code().is_some_and(|c| AUTH_FAILURE_CODES.contains(&c))
    }

    /// Whether a front end should answer with an authentication challenge.
    pub fn is_auth_failure(&self) -> bool {
        self.is_permission()
    }
}

/// Result type for object store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A bucket as reported by a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    /// Bucket name
    pub name: String,
    /// When the bucket was created
    pub creation_date: SystemTime,
}

/// One listing result.
///
/// Non-recursive listings report common prefixes as entries whose key ends
/// in `/`, the way S3 clients flatten `CommonPrefixes` into the object stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Full object key (or common prefix, ending in `/`)
    pub key: String,
    /// Object size in bytes, 0 for prefixes
    pub size: u64,
    /// Last modification time
    pub last_modified: SystemTime,
}

impl ObjectInfo {
    /// True when this entry is a common prefix rather than an object.
    pub fn is_prefix(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// Object listing parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only keys starting with this prefix
    pub prefix: String,
    /// Return every key under the prefix instead of rolling up at `/`
    pub recursive: bool,
    /// Maximum number of entries, 0 for no limit
    pub max_keys: usize,
}

impl ListOptions {
    /// Non-recursive, unlimited listing of `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            recursive: false,
            max_keys: 0,
        }
    }

    /// Switches to a recursive listing.
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Caps the number of returned entries.
    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }
}

/// Seekable byte stream over one stored object.
pub trait ObjectReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ObjectReader for T {}

/// Upload body handed to [`ObjectStore::put_object`].
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// The object store operations the filesystem layer relies on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists every bucket visible to the session.
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>>;

    /// Checks whether `bucket` exists.
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;

    /// Creates `bucket`.
    async fn make_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Removes `bucket`, which must be empty.
    async fn remove_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Lists keys of `bucket` according to `opts`, in key order.
    async fn list_objects(&self, bucket: &str, opts: &ListOptions) -> StoreResult<Vec<ObjectInfo>>;

    /// Opens a read stream over an object. Fails with `NoSuchKey` if absent.
    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Box<dyn ObjectReader>>;

    /// Uploads `size` bytes read from `body`, replacing any existing object.
    async fn put_object(&self, bucket: &str, key: &str, body: ObjectBody, size: u64)
        -> StoreResult<()>;

    /// Deletes an object. Deleting a missing key succeeds.
    async fn remove_object(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Server-side copy of one object.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_codes() {
        assert!(StoreError::service("NoSuchKey", "", "b/k").is_not_found());
        assert!(StoreError::service("NoSuchBucket", "", "b").is_not_found());
        assert!(!StoreError::service("InternalError", "", "b").is_not_found());
    }

    #[test]
    fn test_auth_failure_codes() {
        for code in ["SignatureDoesNotMatch", "InvalidAccessKeyId", "AccessDenied"] {
            let err = StoreError::service(code, "", "b");
            assert!(err.is_auth_failure(), "{code}");
            assert!(err.is_permission());
        }
        assert!(!StoreError::service("NoSuchKey", "", "b").is_auth_failure());
    }

    #[test]
    fn test_transport_has_no_code() {
        let err = StoreError::Transport {
            reason: "timeout".to_string(),
        };
        assert_eq!(err.code(), None);
        assert_eq!(err.resource(), None);
        assert!(!err.is_not_found());
        assert!(!err.is_permission());
    }

    #[test]
    fn test_object_info_is_prefix() {
        let prefix = ObjectInfo {
            key: "docs/".to_string(),
            size: 0,
            last_modified: SystemTime::UNIX_EPOCH,
        };
        let object = ObjectInfo {
            key: "docs/a.txt".to_string(),
            size: 3,
            last_modified: SystemTime::UNIX_EPOCH,
        };
        assert!(prefix.is_prefix());
        assert!(!object.is_prefix());
    }

    #[test]
    fn test_list_options_builder() {
        let opts = ListOptions::with_prefix("a/").recursive().max_keys(5);
        assert_eq!(opts.prefix, "a/");
        assert!(opts.recursive);
        assert_eq!(opts.max_keys, 5);
        assert!(!ListOptions::with_prefix("x").recursive);
    }
}
