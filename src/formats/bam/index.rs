//! BAI and CSI binning indexes.
//!
//! Both formats partition each reference into a hierarchy of bins. Level 0 is
//! one bin covering `1 << (min_shift + 3 * depth)` bases and every level below
//! splits its parent eight ways, down to leaves of `1 << min_shift` bases.
//! BAI fixes `min_shift = 14, depth = 5` (16 kb leaves, 512 Mb root) and adds a
//! linear index of the smallest record offset per 16 kb tile. CSI stores the
//! smallest offset per bin (`loffset`) instead.

use crate::bgzf::{Chunk, VirtualOffset, merge_chunks};
use crate::storage::RandomAccess;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Cursor, Read};

const BAI_MAGIC: &[u8; 4] = b"BAI\x01";
const CSI_MAGIC: &[u8; 4] = b"CSI\x01";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub const BAI_MIN_SHIFT: u32 = 14;
pub const BAI_DEPTH: u32 = 5;

/// Deepest CSI hierarchy whose pseudo-bin id still fits in a `u32`
const MAX_DEPTH: usize = 10;
/// Widest addressable span, `min_shift + 3 * depth`
const MAX_SPAN_BITS: usize = 62;

/// Offset of the first bin on `level`
fn level_offset(level: u32) -> u32 {
    (((1u64 << (3 * level)) - 1) / 7) as u32
}

/// Id of the metadata pseudo-bin, one past the last real bin (37450 for BAI)
pub fn pseudo_bin(depth: u32) -> u32 {
    level_offset(depth + 1) + 1
}

/// Smallest bin fully containing `[start, end)`.
pub fn reg2bin(start: u64, end: u64, min_shift: u32, depth: u32) -> u32 {
    let end = end.max(start + 1) - 1;
    let mut shift = min_shift;
    for level in (1..=depth).rev() {
        if start >> shift == end >> shift {
            return level_offset(level) + (start >> shift) as u32;
        }
        shift += 3;
    }
    0
}

/// Every bin that may hold records overlapping `[start, end)`, in level order.
pub fn reg2bins(start: u64, end: u64, min_shift: u32, depth: u32) -> Vec<u32> {
    let max_pos = 1u64 << (min_shift + 3 * depth);
    if start >= end || start >= max_pos {
        return Vec::new();
    }
    let end = end.min(max_pos) - 1;

    let mut bins = Vec::new();
    for level in 0..=depth {
        let shift = min_shift + 3 * (depth - level);
        let offset = level_offset(level);
        let first = offset + (start >> shift) as u32;
        let last = offset + (end >> shift) as u32;
        bins.extend(first..=last);
    }
    bins
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Bai,
    Csi,
}

/// Counts stored in the metadata pseudo-bin of one reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceMetadata {
    pub mapped: u64,
    pub unmapped: u64,
}

#[derive(Debug, Clone, Default)]
struct Bin {
    loffset: VirtualOffset,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Default)]
struct ReferenceIndex {
    bins: HashMap<u32, Bin>,
    linear: Vec<VirtualOffset>,
    metadata: Option<ReferenceMetadata>,
}

/// A parsed BAI or CSI index. Immutable once read.
#[derive(Debug, Clone)]
pub struct AlignmentIndex {
    kind: IndexKind,
    min_shift: u32,
    depth: u32,
    references: Vec<ReferenceIndex>,
    unplaced_unmapped: Option<u64>,
}

impl AlignmentIndex {
    /// Read a whole index file. CSI files are BGZF compressed and are
    /// inflated before parsing.
    pub async fn read_from(source: &dyn RandomAccess) -> Result<Self> {
        let raw = source.read_exact_at(0, source.len() as usize).await?;
        if raw.starts_with(&GZIP_MAGIC) {
            let mut inflated = Vec::new();
            MultiGzDecoder::new(&raw[..])
                .read_to_end(&mut inflated)
                .map_err(|e| Error::format(0, format!("cannot inflate index: {}", e)))?;
            Self::parse(&inflated)
        } else {
            Self::parse(&raw)
        }
    }

    /// Parse decompressed index bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = IndexReader::new(bytes);
        let magic = reader.bytes(4)?;
        let (kind, min_shift, depth) = if magic == BAI_MAGIC {
            (IndexKind::Bai, BAI_MIN_SHIFT, BAI_DEPTH)
        } else if magic == CSI_MAGIC {
            let min_shift = reader.count("min_shift")?;
            let depth = reader.count("depth")?;
            if depth == 0 || depth > MAX_DEPTH || min_shift > MAX_SPAN_BITS - 3 * depth {
                return Err(Error::format(
                    4,
                    format!("unsupported CSI geometry min_shift={} depth={}", min_shift, depth),
                ));
            }
            let l_aux = reader.count("l_aux")?;
            reader.bytes(l_aux)?;
            (IndexKind::Csi, min_shift as u32, depth as u32)
        } else {
            return Err(Error::format(0, format!("bad index magic {:02x?}", magic)));
        };

        let pseudo = pseudo_bin(depth);
        let n_ref = reader.count("n_ref")?;
        let mut references = Vec::with_capacity(n_ref.min(1 << 16));

        for _ in 0..n_ref {
            let mut reference = ReferenceIndex::default();
            let n_bin = reader.count("n_bin")?;
            for _ in 0..n_bin {
                let id = reader.u32()?;
                let loffset = match kind {
                    IndexKind::Csi => VirtualOffset::from_raw(reader.u64()?),
                    IndexKind::Bai => VirtualOffset::default(),
                };
                let n_chunk = reader.count("n_chunk")?;
                let mut chunks = Vec::with_capacity(n_chunk.min(1 << 16));
                for _ in 0..n_chunk {
                    let start = VirtualOffset::from_raw(reader.u64()?);
                    let end = VirtualOffset::from_raw(reader.u64()?);
                    chunks.push(Chunk::new(start, end));
                }

                if id == pseudo {
                    if let [_, counts] = chunks[..] {
                        reference.metadata = Some(ReferenceMetadata {
                            mapped: counts.start.as_raw(),
                            unmapped: counts.end.as_raw(),
                        });
                    }
                    continue;
                }
                reference.bins.insert(id, Bin { loffset, chunks });
            }

            if kind == IndexKind::Bai {
                let n_intv = reader.count("n_intv")?;
                reference.linear = (0..n_intv)
                    .map(|_| reader.u64().map(VirtualOffset::from_raw))
                    .collect::<Result<_>>()?;
            }
            references.push(reference);
        }

        let unplaced_unmapped = if reader.remaining() >= 8 {
            Some(reader.u64()?)
        } else {
            None
        };

        tracing::debug!(
            "parsed {:?} index: {} references, min_shift={}, depth={}",
            kind,
            references.len(),
            min_shift,
            depth
        );

        Ok(Self {
            kind,
            min_shift,
            depth,
            references,
            unplaced_unmapped,
        })
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn min_shift(&self) -> u32 {
        self.min_shift
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn metadata(&self, ref_index: usize) -> Option<ReferenceMetadata> {
        self.references.get(ref_index).and_then(|r| r.metadata)
    }

    /// Records with neither a reference nor a position
    pub fn unplaced_unmapped(&self) -> Option<u64> {
        self.unplaced_unmapped
    }

    /// The merged, ordered chunks that may hold records overlapping
    /// `[start, end)` on `ref_index`.
    pub fn region_to_chunks(&self, ref_index: usize, start: u64, end: u64) -> Result<Vec<Chunk>> {
        if start > end {
            return Err(Error::invalid_region(
                start as i64,
                end as i64,
                "start is after end",
            ));
        }
        let Some(reference) = self.references.get(ref_index) else {
            return Ok(Vec::new());
        };

        let bins = reg2bins(start, end, self.min_shift, self.depth);
        if bins.is_empty() {
            return Ok(Vec::new());
        }

        let min_offset = self.min_offset(reference, start);
        let chunks: Vec<Chunk> = bins
            .iter()
            .filter_map(|id| reference.bins.get(id))
            .flat_map(|bin| bin.chunks.iter().copied())
            .filter(|chunk| chunk.end >= min_offset)
            .collect();

        let merged = merge_chunks(chunks);
        tracing::debug!(
            "ref {} [{}, {}): {} candidate bins, {} chunks after merge, min offset {}",
            ref_index,
            start,
            end,
            bins.len(),
            merged.len(),
            min_offset
        );
        Ok(merged)
    }

    /// Smallest virtual offset of any record that can overlap `start`
    fn min_offset(&self, reference: &ReferenceIndex, start: u64) -> VirtualOffset {
        match self.kind {
            IndexKind::Bai => {
                if reference.linear.is_empty() {
                    return VirtualOffset::default();
                }
                let tile = ((start >> BAI_MIN_SHIFT) as usize).min(reference.linear.len() - 1);
                reference.linear[tile]
            }
            IndexKind::Csi => {
                let max_pos = 1u64 << (self.min_shift + 3 * self.depth);
                let leaf = level_offset(self.depth) + (start.min(max_pos - 1) >> self.min_shift) as u32;
                let mut bin = leaf;
                loop {
                    if let Some(found) = reference.bins.get(&bin) {
                        return found.loffset;
                    }
                    if bin == 0 {
                        return VirtualOffset::default();
                    }
                    bin = (bin - 1) >> 3;
                }
            }
        }
    }
}

/// Little-endian reads over an index buffer; running out of bytes is a
/// format error since index files carry no framing.
struct IndexReader<'a> {
    inner: Cursor<&'a [u8]>,
}

impl<'a> IndexReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            inner: Cursor::new(bytes),
        }
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn remaining(&self) -> usize {
        self.inner.get_ref().len().saturating_sub(self.inner.position() as usize)
    }

    fn truncated(&self) -> Error {
        Error::format(self.position(), "index ends unexpectedly")
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.truncated());
        }
        let start = self.inner.position() as usize;
        self.inner.set_position((start + n) as u64);
        let all: &'a [u8] = *self.inner.get_ref();
        Ok(&all[start..start + n])
    }

    fn u32(&mut self) -> Result<u32> {
        self.inner.read_u32::<LittleEndian>().map_err(|_| self.truncated())
    }

    fn u64(&mut self) -> Result<u64> {
        self.inner.read_u64::<LittleEndian>().map_err(|_| self.truncated())
    }

    /// A non-negative i32 count
    fn count(&mut self, field: &str) -> Result<usize> {
        let offset = self.position();
        let value = self.inner.read_i32::<LittleEndian>().map_err(|_| self.truncated())?;
        usize::try_from(value)
            .map_err(|_| Error::format(offset, format!("negative {} in index: {}", field, value)))
    }
}
