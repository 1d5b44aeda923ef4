use std::fmt;

/// A BGZF virtual file offset.
///
/// The high 48 bits hold the file offset of a compressed block, the low
/// 16 bits an offset into that block's decompressed bytes. Ordering the raw
/// value orders by block first, then by position inside the block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Largest compressed offset representable in 48 bits
    pub const MAX_COMPRESSED: u64 = (1 << 48) - 1;

    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        debug_assert!(compressed <= Self::MAX_COMPRESSED);
        VirtualOffset((compressed << 16) | u64::from(uncompressed))
    }

    pub fn from_raw(value: u64) -> Self {
        VirtualOffset(value)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// File offset of the compressed block
    pub fn compressed(self) -> u64 {
        self.0 >> 16
    }

    /// Offset within the decompressed block
    pub fn uncompressed(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl From<u64> for VirtualOffset {
    fn from(value: u64) -> Self {
        VirtualOffset(value)
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.compressed(), self.uncompressed())
    }
}

/// A span of the decompressed stream, `[start, end)` in virtual offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub start: VirtualOffset,
    pub end: VirtualOffset,
}

impl Chunk {
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Chunk { start, end }
    }
}

/// Sort chunks by start and coalesce overlapping or adjacent spans.
pub fn merge_chunks(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort_by_key(|c| (c.start, c.end));

    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(last) if chunk.start <= last.end => {
                if chunk.end > last.end {
                    last.end = chunk.end;
                }
            }
            _ => merged.push(chunk),
        }
    }
    merged
}
