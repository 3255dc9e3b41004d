#![warn(missing_docs)]

//! s3dav gateway: an S3-compatible object store exposed as a hierarchical
//! filesystem for WebDAV front ends

pub mod cli;
pub mod config;
pub mod dummy_dirs;
pub mod error;
pub mod file;
pub mod fs;
pub mod mem_store;
pub mod path;
pub mod resolver;
pub mod staging;
pub mod store;
pub mod tree_ops;

pub use config::{FsConfig, GatewayConfig, StagingMode};
pub use dummy_dirs::DummyDirRegistry;
pub use error::{FsError, Result};
pub use file::{FileHandle, OpenFlags};
pub use fs::{EntryResolver, HandleProvider, ObjectFs};
pub use mem_store::MemoryStore;
pub use path::ObjectPath;
pub use resolver::{Entry, EntryKind};
pub use store::{ObjectStore, StoreError};
