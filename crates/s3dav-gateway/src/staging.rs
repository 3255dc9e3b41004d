//! Write staging for open file handles.
//!
//! Object stores have no partial writes, so a handle collects everything
//! written to it and uploads it in one piece on close. [`WriteStage`] is the
//! staging half of that two-phase cycle: bytes are appended while staging,
//! then [`WriteStage::take_body`] hands them to the commit and leaves the
//! stage empty. Large uploads can spill into an anonymous temporary file,
//! which the OS reclaims as soon as the stage drops it.

use std::io::{Cursor, SeekFrom};
use std::time::SystemTime;

use bytes::BytesMut;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::config::StagingMode;
use crate::error::Result;
use crate::resolver::PendingWrite;
use crate::store::ObjectBody;

enum StagingSink {
    Memory(BytesMut),
    Spilled { file: File, len: u64 },
}

impl StagingSink {
    fn len(&self) -> u64 {
        match self {
            StagingSink::Memory(buf) => buf.len() as u64,
            StagingSink::Spilled { len, .. } => *len,
        }
    }
}

/// Bytes written through one handle, waiting for commit.
pub struct WriteStage {
    mode: StagingMode,
    sink: StagingSink,
    modified: Option<SystemTime>,
}

impl WriteStage {
    /// Creates an empty stage.
    pub fn new(mode: StagingMode) -> Self {
        Self {
            mode,
            sink: StagingSink::Memory(BytesMut::new()),
            modified: None,
        }
    }

    /// Number of staged bytes.
    pub fn len(&self) -> u64 {
        self.sink.len()
    }

    /// True when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once staged bytes live in a temporary file.
    pub fn is_spilled(&self) -> bool {
        matches!(self.sink, StagingSink::Spilled { .. })
    }

    /// Staged size and time, if anything is staged.
    pub fn pending(&self) -> Option<PendingWrite> {
        match (self.len(), self.modified) {
            (0, _) | (_, None) => None,
            (size, Some(modified)) => Some(PendingWrite { size, modified }),
        }
    }

    /// Appends `data`, spilling to a temporary file past the configured threshold.
    pub async fn append(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let over_threshold = match (self.mode, &self.sink) {
            (StagingMode::Spill { threshold }, StagingSink::Memory(buf)) => {
                buf.len() as u64 + data.len() as u64 > threshold
            }
            _ => false,
        };
        if over_threshold {
            self.spill().await?;
        }
        match &mut self.sink {
            StagingSink::Memory(buf) => buf.extend_from_slice(data),
            StagingSink::Spilled { file, len } => {
                file.write_all(data).await?;
                *len += data.len() as u64;
            }
        }
        self.modified = Some(SystemTime::now());
        Ok(())
    }

    async fn spill(&mut self) -> Result<()> {
        let mut file = File::from_std(tempfile::tempfile()?);
        let len = match &self.sink {
            StagingSink::Memory(buf) => {
                file.write_all(buf).await?;
                buf.len() as u64
            }
            StagingSink::Spilled { .. } => return Ok(()),
        };
        debug!(staged = len, "spilling write stage to temporary file");
        self.sink = StagingSink::Spilled { file, len };
        Ok(())
    }

    /// Drops everything staged, including any temporary file.
    pub fn discard(&mut self) {
        self.sink = StagingSink::Memory(BytesMut::new());
        self.modified = None;
    }

    /// Hands the staged bytes over for upload and resets the stage.
    ///
    /// Returns `None` when nothing is staged.
    pub async fn take_body(&mut self) -> Result<Option<(ObjectBody, u64)>> {
        if self.is_empty() {
            return Ok(None);
        }
        self.modified = None;
        let sink = std::mem::replace(&mut self.sink, StagingSink::Memory(BytesMut::new()));
        match sink {
            StagingSink::Memory(buf) => {
                let len = buf.len() as u64;
                Ok(Some((Box::new(Cursor::new(buf.freeze())), len)))
            }
            StagingSink::Spilled { mut file, len } => {
                file.flush().await?;
                file.seek(SeekFrom::Start(0)).await?;
                Ok(Some((Box::new(file), len)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn drain(stage: &mut WriteStage) -> Vec<u8> {
        let (mut body, len) = stage.take_body().await.unwrap().unwrap();
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len() as u64, len);
        out
    }

    #[tokio::test]
    async fn test_memory_stage() {
        let mut stage = WriteStage::new(StagingMode::Memory);
        assert!(stage.pending().is_none());
        stage.append(b"hello ").await.unwrap();
        stage.append(b"world").await.unwrap();
        assert_eq!(stage.len(), 11);
        assert!(!stage.is_spilled());
        assert_eq!(stage.pending().unwrap().size, 11);
        assert_eq!(drain(&mut stage).await, b"hello world");
        assert!(stage.is_empty());
        assert!(stage.take_body().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spill_past_threshold() {
        let mut stage = WriteStage::new(StagingMode::Spill { threshold: 8 });
        stage.append(b"12345").await.unwrap();
        assert!(!stage.is_spilled());
        stage.append(b"67890").await.unwrap();
        assert!(stage.is_spilled());
        stage.append(b"abc").await.unwrap();
        assert_eq!(stage.len(), 13);
        assert_eq!(drain(&mut stage).await, b"1234567890abc");
        assert!(!stage.is_spilled());
    }

    #[tokio::test]
    async fn test_spill_threshold_zero_spills_immediately() {
        let mut stage = WriteStage::new(StagingMode::Spill { threshold: 0 });
        stage.append(b"x").await.unwrap();
        assert!(stage.is_spilled());
        assert_eq!(drain(&mut stage).await, b"x");
    }

    #[tokio::test]
    async fn test_empty_append_is_noop() {
        let mut stage = WriteStage::new(StagingMode::Spill { threshold: 0 });
        stage.append(b"").await.unwrap();
        assert!(stage.is_empty());
        assert!(!stage.is_spilled());
        assert!(stage.pending().is_none());
    }

    #[tokio::test]
    async fn test_discard() {
        let mut stage = WriteStage::new(StagingMode::Spill { threshold: 2 });
        stage.append(b"abcdef").await.unwrap();
        stage.discard();
        assert!(stage.is_empty());
        assert!(stage.pending().is_none());
        assert!(stage.take_body().await.unwrap().is_none());
    }
}
