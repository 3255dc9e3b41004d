//! Open file handles.
//!
//! A [`FileHandle`] binds one path to one store client. Reads stream from the
//! object lazily; writes are staged and uploaded as a whole object on
//! [`FileHandle::close`]. All handle operations are serialized behind an
//! async mutex, so a handle may be shared between tasks.

use std::io::SeekFrom;
use std::ops::BitOr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::FsConfig;
use crate::dummy_dirs::DummyDirRegistry;
use crate::error::{FsError, Result};
use crate::path::ObjectPath;
use crate::resolver::{Entry, Resolver};
use crate::staging::WriteStage;
use crate::store::{ObjectReader, ObjectStore, StoreError};

/// POSIX-style open flags as passed by the protocol front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// Open for reading only
    pub const RDONLY: OpenFlags = OpenFlags(0);
    /// Open for writing only
    pub const WRONLY: OpenFlags = OpenFlags(0o1);
    /// Open for reading and writing
    pub const RDWR: OpenFlags = OpenFlags(0o2);
    /// Create the object if it does not exist
    pub const CREATE: OpenFlags = OpenFlags(0o100);
    /// Fail if the object exists
    pub const EXCL: OpenFlags = OpenFlags(0o200);
    /// Truncate on open
    pub const TRUNC: OpenFlags = OpenFlags(0o1000);
    /// Append on write
    pub const APPEND: OpenFlags = OpenFlags(0o2000);

    /// Wraps raw flag bits.
    pub fn from_bits(bits: u32) -> Self {
        OpenFlags(bits)
    }

    /// Raw flag bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set. `RDONLY` is always contained.
    pub fn contains(&self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when `CREATE` is set.
    pub fn is_create(&self) -> bool {
        self.contains(OpenFlags::CREATE)
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

enum ReadStream {
    Unopened,
    Open(Box<dyn ObjectReader>),
}

struct HandleState {
    offset: u64,
    reader: ReadStream,
    stage: WriteStage,
    closed: bool,
}

/// One open file.
pub struct FileHandle {
    path: ObjectPath,
    store: Arc<dyn ObjectStore>,
    registry: Arc<DummyDirRegistry>,
    config: Arc<FsConfig>,
    flags: OpenFlags,
    state: Mutex<HandleState>,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

fn read_failure(e: std::io::Error) -> FsError {
    FsError::Upstream {
        source: StoreError::Transport {
            reason: e.to_string(),
        },
    }
}

impl FileHandle {
    /// Creates a handle for `path`. Does not touch the store.
    pub fn open(
        path: ObjectPath,
        store: Arc<dyn ObjectStore>,
        registry: Arc<DummyDirRegistry>,
        config: Arc<FsConfig>,
        flags: OpenFlags,
    ) -> Self {
        let stage = WriteStage::new(config.staging);
        Self {
            path,
            store,
            registry,
            config,
            flags,
            state: Mutex::new(HandleState {
                offset: 0,
                reader: ReadStream::Unopened,
                stage,
                closed: false,
            }),
        }
    }

    /// The bound path.
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Flags the handle was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Bucket and key of the bound path; buckets and the root hold no bytes.
    fn location(&self) -> Result<(&str, String)> {
        match self.path.bucket() {
            Some(bucket) if self.path.depth() >= 2 => Ok((bucket, self.path.key())),
            _ => Err(FsError::invalid_argument(format!(
                "{} is not an object path",
                self.path
            ))),
        }
    }

    async fn reader<'s>(
        &self,
        state: &'s mut HandleState,
    ) -> Result<&'s mut Box<dyn ObjectReader>> {
        if state.closed {
            return Err(FsError::invalid_argument("handle is closed"));
        }
        let (bucket, key) = self.location()?;
        if let ReadStream::Unopened = state.reader {
            trace!(bucket, key = %key, "opening read stream");
            let stream = self.store.get_object(bucket, &key).await?;
            state.reader = ReadStream::Open(stream);
        }
        match &mut state.reader {
            ReadStream::Open(stream) => Ok(stream),
            ReadStream::Unopened => Err(FsError::not_found(self.path.to_string())),
        }
    }

    /// Reads into `buf`, returning the number of bytes read (0 at end of object).
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let stream = self.reader(&mut state).await?;
        stream.read(buf).await.map_err(read_failure)
    }

    /// Stages `data` for upload on close.
    ///
    /// Only sequential writes from the start of the object are possible; a
    /// write after a seek to a non-zero offset discards everything staged.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        if self.config.read_only {
            return Err(FsError::permission_denied("filesystem is read-only"));
        }
        self.location()?;
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FsError::invalid_argument("handle is closed"));
        }
        if state.offset != 0 {
            state.stage.discard();
            return Err(FsError::invalid_argument(format!(
                "cannot write at offset {} of {}",
                state.offset, self.path
            )));
        }
        state.stage.append(data).await?;
        Ok(data.len())
    }

    /// Moves the read position and returns the new absolute offset.
    pub async fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut state = self.state.lock().await;
        let stream = self.reader(&mut state).await?;
        let offset = stream.seek(pos).await.map_err(read_failure)?;
        state.offset = offset;
        Ok(offset)
    }

    /// Uploads staged bytes, if any, and releases the read stream.
    ///
    /// Closing an already closed handle does nothing.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.reader = ReadStream::Unopened;

        let Some((body, size)) = state.stage.take_body().await? else {
            return Ok(());
        };
        let (bucket, key) = self.location()?;
        debug!(bucket, key = %key, size, "committing staged write");
        self.store.put_object(bucket, &key, body, size).await?;
        self.registry.clear_lineage(&self.path);
        Ok(())
    }

    /// Stats the bound path, reporting staged bytes as the file size.
    pub async fn stat(&self) -> Result<Entry> {
        let pending = self.state.lock().await.stage.pending();
        Resolver::new(self.store.as_ref(), &self.registry, &self.config)
            .stat(&self.path, pending, self.flags.is_create())
            .await
    }

    /// Lists the bound path as a directory.
    pub async fn readdir(&self, limit: usize) -> Result<Vec<Entry>> {
        Resolver::new(self.store.as_ref(), &self.registry, &self.config)
            .list(&self.path, limit)
            .await
    }
}
