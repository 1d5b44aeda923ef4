use super::RandomAccess;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The two archive families served from a data directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    #[serde(rename = "reads")]
    Alignment,
    Signal,
}

impl ArchiveKind {
    fn extensions(&self) -> &'static [&'static str] {
        match self {
            ArchiveKind::Alignment => &["bam"],
            ArchiveKind::Signal => &["bw", "bigwig", "bigWig"],
        }
    }
}

/// A read-only local file supporting concurrent positioned reads.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    file: Arc<std::fs::File>,
    len: u64,
}

impl LocalFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        let file = file.into_std().await;

        tracing::debug!("opened {:?} ({} bytes)", path, len);

        Ok(Self {
            path,
            file: Arc::new(file),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RandomAccess for LocalFile {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        if offset >= self.len {
            return Ok(Bytes::new());
        }
        let available = usize::try_from(self.len - offset).unwrap_or(usize::MAX);
        let len = len.min(available);

        let file = Arc::clone(&self.file);
        let buf = tokio::task::spawn_blocking(move || read_full_at(&file, offset, len))
            .await
            .map_err(std::io::Error::other)??;

        Ok(Bytes::from(buf))
    }
}

fn read_full_at(file: &std::fs::File, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match positioned_read(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(unix)]
fn positioned_read(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn positioned_read(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Resolves archive ids to files inside a data directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    data_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(Error::InvalidInput(format!("invalid archive id: {:?}", id)));
        }
        Ok(())
    }

    /// Path of the archive for `id`, if one exists
    pub async fn archive_path(&self, id: &str, kind: ArchiveKind) -> Result<Option<PathBuf>> {
        Self::validate_id(id)?;
        for ext in kind.extensions() {
            let path = self.data_dir.join(format!("{}.{}", id, ext));
            if tokio::fs::try_exists(&path).await? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    pub async fn exists(&self, id: &str, kind: ArchiveKind) -> Result<bool> {
        Ok(self.archive_path(id, kind).await?.is_some())
    }

    /// Locate the companion index of an alignment archive.
    ///
    /// Checks the appended (`file.bam.bai`), replaced (`file.bai`) and CSI
    /// (`file.bam.csi`) conventions in that order.
    pub async fn alignment_index_path(bam_path: &Path) -> Result<Option<PathBuf>> {
        let candidates = [
            PathBuf::from(format!("{}.bai", bam_path.display())),
            bam_path.with_extension("bai"),
            PathBuf::from(format!("{}.csi", bam_path.display())),
        ];
        for candidate in candidates {
            if tokio::fs::try_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}
