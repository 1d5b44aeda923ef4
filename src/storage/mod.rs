//! Random-access byte sources for archive files.
//!
//! Every archive handle reads through a [`RandomAccess`] source using
//! positioned reads, so many region queries can share one open file without
//! contending for a seek cursor.
//!
//! # Implementations
//!
//! - [`LocalFile`] - read-only local file, positioned reads on the blocking pool
//! - [`MemorySource`] - an archive already held in memory
//!
//! [`LocalStorage`] maps file ids in a data directory to archive paths and
//! their companion index files.
//!
//! # Example
//!
//! ```no_run
//! use trackr::storage::{LocalFile, RandomAccess};
//!
//! # async fn run() -> trackr::Result<()> {
//! let file = LocalFile::open("data/sample.bam").await?;
//! let magic = file.read_exact_at(0, 4).await?;
//! # Ok(())
//! # }
//! ```

mod local;

pub use local::{ArchiveKind, LocalFile, LocalStorage};

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// A source of bytes addressable by absolute file offset.
#[async_trait]
pub trait RandomAccess: Send + Sync {
    /// Total length of the source in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `len` bytes starting at `offset`.
    /// Returns fewer bytes only when the end of the source is reached.
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes>;

    /// Read exactly `len` bytes starting at `offset`, failing on a short read
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let bytes = self.read_at(offset, len).await?;
        if bytes.len() < len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "file truncated: wanted {} bytes at offset {}, got {}",
                    len,
                    offset,
                    bytes.len()
                ),
            )
            .into());
        }
        Ok(bytes)
    }
}

/// An archive held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl RandomAccess for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let start = usize::try_from(offset)
            .map_err(|_| Error::InvalidInput(format!("offset {} out of range", offset)))?;
        if start >= self.data.len() {
            return Ok(Bytes::new());
        }
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data.slice(start..end))
    }
}
