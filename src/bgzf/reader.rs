use super::block::{Block, MAX_BLOCK_SIZE, block_size, decode_block};
use super::virtual_offset::{Chunk, VirtualOffset};
use crate::storage::RandomAccess;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use moka::future::Cache;
use std::sync::Arc;

/// Random access to the decompressed stream of a BGZF file.
///
/// Decompressed blocks are kept in a bounded concurrent cache owned by the
/// reader. Concurrent requests for the same block share one decompression;
/// requests for different blocks never wait on each other.
pub struct BlockReader {
    source: Arc<dyn RandomAccess>,
    cache: Cache<u64, Arc<Block>>,
}

impl BlockReader {
    pub fn new(source: Arc<dyn RandomAccess>, cache_blocks: u64) -> Self {
        let cache = Cache::builder().max_capacity(cache_blocks.max(1)).build();
        Self { source, cache }
    }

    /// Decompress the block starting at `offset`.
    pub async fn open_block(&self, offset: u64) -> Result<Arc<Block>> {
        self.cache
            .try_get_with(offset, self.load_block(offset))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn load_block(&self, offset: u64) -> Result<Arc<Block>> {
        tracing::trace!("cache miss, inflating BGZF block at {}", offset);

        let raw = self.source.read_at(offset, MAX_BLOCK_SIZE).await?;
        if raw.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("no BGZF block at offset {}, file is {} bytes", offset, self.source.len()),
            )
            .into());
        }

        let size = block_size(&raw, offset)?;
        let data = decode_block(&raw[..size.min(raw.len())], offset)?;

        Ok(Arc::new(Block {
            offset,
            compressed_len: size as u64,
            data,
        }))
    }

    /// Read `len` decompressed bytes starting at `offset`, crossing block
    /// boundaries as needed.
    pub async fn read_at(&self, offset: VirtualOffset, len: usize) -> Result<Bytes> {
        self.cursor(offset).read_exact(len).await
    }

    /// An unbounded cursor from `start` to the end of the file
    pub fn cursor(&self, start: VirtualOffset) -> BlockCursor<'_> {
        BlockCursor {
            reader: self,
            position: start,
            end: None,
        }
    }

    /// A cursor over exactly the bytes of `chunk`
    pub fn chunk(&self, chunk: Chunk) -> BlockCursor<'_> {
        BlockCursor {
            reader: self,
            position: chunk.start,
            end: Some(chunk.end),
        }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Sequential reads over a span of the decompressed stream.
pub struct BlockCursor<'a> {
    reader: &'a BlockReader,
    position: VirtualOffset,
    end: Option<VirtualOffset>,
}

impl BlockCursor<'_> {
    pub fn position(&self) -> VirtualOffset {
        self.position
    }

    fn exhausted(&self) -> bool {
        match self.end {
            Some(end) if self.position >= end => true,
            _ => self.position.compressed() >= self.reader.source.len(),
        }
    }

    /// Up to `max` bytes from the current block, `None` once the span ends.
    async fn take(&mut self, max: usize) -> Result<Option<Bytes>> {
        loop {
            if self.exhausted() {
                return Ok(None);
            }

            let block = self.reader.open_block(self.position.compressed()).await?;
            let start = usize::from(self.position.uncompressed());
            if start > block.len() {
                return Err(Error::format(
                    block.offset,
                    format!(
                        "virtual offset {} points past a {}-byte block",
                        self.position,
                        block.len()
                    ),
                ));
            }

            let limit = match self.end {
                Some(end) if end.compressed() == block.offset => {
                    usize::from(end.uncompressed()).min(block.len())
                }
                _ => block.len(),
            };
            let stop = limit.min(start.saturating_add(max));

            self.position = if stop >= block.len() {
                VirtualOffset::new(block.next_offset(), 0)
            } else {
                VirtualOffset::new(block.offset, stop as u16)
            };

            if stop > start {
                return Ok(Some(block.data.slice(start..stop)));
            }
        }
    }

    /// The next run of decompressed bytes, block by block
    pub async fn next_slice(&mut self) -> Result<Option<Bytes>> {
        self.take(usize::MAX).await
    }

    pub async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        let mut parts: Vec<Bytes> = Vec::new();
        let mut got = 0;

        while got < len {
            let Some(slice) = self.take(len - got).await? else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {} bytes at {}", got, len, self.position),
                )
                .into());
            };
            got += slice.len();
            parts.push(slice);
        }

        Ok(match parts.len() {
            0 => Bytes::new(),
            1 => parts.swap_remove(0),
            _ => {
                let mut buf = BytesMut::with_capacity(len);
                for part in &parts {
                    buf.extend_from_slice(part);
                }
                buf.freeze()
            }
        })
    }
}
