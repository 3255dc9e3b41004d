//! Error types for the s3dav filesystem layer

use thiserror::Error;

use crate::store::StoreError;

/// HTTP status: bad request
pub const HTTP_BAD_REQUEST: u16 = 400;
/// HTTP status: forbidden
pub const HTTP_FORBIDDEN: u16 = 403;
/// HTTP status: not found
pub const HTTP_NOT_FOUND: u16 = 404;
/// HTTP status: internal server error
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
/// HTTP status: bad gateway
pub const HTTP_BAD_GATEWAY: u16 = 502;

/// Errors surfaced by filesystem operations to the protocol front end.
#[derive(Error, Debug)]
pub enum FsError {
    /// Missing bucket, object, or dummy directory
    #[error("not found: {path}")]
    NotFound {
        /// The path or key that could not be resolved
        path: String,
    },
    /// Mutation while read-only, or a disallowed bucket operation
    #[error("permission denied: {reason}")]
    PermissionDenied {
        /// Why the operation was refused
        reason: String,
    },
    /// Path depth unsuitable for the operation, or a write after seek
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the request
        reason: String,
    },
    /// Object store call failed for any other reason
    #[error("upstream failure: {source}")]
    Upstream {
        /// The unclassified store error
        #[source]
        source: StoreError,
    },
    /// Temporary staging storage failed
    #[error("staging I/O error: {0}")]
    Staging(#[from] std::io::Error),
}

impl FsError {
    /// Shorthand for a not-found error on `path`.
    pub fn not_found(path: impl Into<String>) -> Self {
        FsError::NotFound { path: path.into() }
    }

    /// Shorthand for a permission-denied error.
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        FsError::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Shorthand for an invalid-argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        FsError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns true for [`FsError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }

    /// Converts the error to the HTTP status a WebDAV front end should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            FsError::NotFound { .. } => HTTP_NOT_FOUND,
            FsError::PermissionDenied { .. } => HTTP_FORBIDDEN,
            FsError::InvalidArgument { .. } => HTTP_BAD_REQUEST,
            FsError::Upstream { .. } => HTTP_BAD_GATEWAY,
            FsError::Staging(e) => {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    HTTP_FORBIDDEN
                } else {
                    HTTP_INTERNAL_SERVER_ERROR
                }
            }
        }
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            return FsError::NotFound {
                path: err.resource().unwrap_or_default().to_string(),
            };
        }
        if err.is_permission() {
            return FsError::PermissionDenied {
                reason: err.to_string(),
            };
        }
        FsError::Upstream { source: err }
    }
}

/// Result type alias using FsError as the error type.
pub type Result<T> = std::result::Result<T, FsError>;
