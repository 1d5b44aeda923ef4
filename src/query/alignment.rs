use super::binning::Stats;
use super::{ArchiveOptions, Lifecycle, check_bins, check_region};
use crate::bgzf::{BlockReader, Chunk};
use crate::formats::ReferenceSequence;
use crate::formats::bam::{AlignmentIndex, AlignmentRecord, Header, parse_next, record_len};
use crate::storage::{LocalFile, LocalStorage, RandomAccess};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use serde::Serialize;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadQueryOptions {
    /// Stop decoding after this many matching records
    pub max_records: usize,
    /// Decode sequence and base qualities
    pub include_sequence: bool,
}

impl Default for ReadQueryOptions {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            include_sequence: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageOptions {
    /// Width of each output bin; the last bin may be shorter
    pub bin_size: u64,
    /// Records with any of these flag bits are skipped. Unmapped records are
    /// always skipped.
    pub exclude_flags: u16,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self {
            bin_size: 1000,
            exclude_flags: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageBin {
    pub start: u64,
    pub end: u64,
    /// Mean depth across the bin
    pub coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageResult {
    pub bins: Vec<CoverageBin>,
    pub stats: Stats,
    pub read_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceCounts {
    pub name: String,
    pub mapped: Option<u64>,
    pub unmapped: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub references: Vec<ReferenceCounts>,
    pub unplaced_unmapped: Option<u64>,
}

/// An open BAM file with its index.
pub struct AlignmentArchive {
    label: String,
    reader: BlockReader,
    header: Header,
    index: AlignmentIndex,
    max_bins: u64,
    lifecycle: Lifecycle,
}

impl AlignmentArchive {
    /// Open from byte sources for the BAM data and its BAI or CSI index.
    pub async fn open(
        data: Arc<dyn RandomAccess>,
        index: Arc<dyn RandomAccess>,
        options: &ArchiveOptions,
    ) -> Result<Self> {
        Self::open_labelled("<memory>".to_string(), data, index, options).await
    }

    /// Open a BAM file, locating its companion index next to it.
    pub async fn open_path(path: impl AsRef<Path>, options: &ArchiveOptions) -> Result<Self> {
        let path = path.as_ref();
        let data = LocalFile::open(path).await?;
        let Some(index_path) = LocalStorage::alignment_index_path(path).await? else {
            return Err(Error::MissingIndex(path.to_path_buf()));
        };
        let index = LocalFile::open(&index_path).await?;
        tracing::debug!("using index {:?} for {:?}", index_path, path);

        Self::open_labelled(
            path.display().to_string(),
            Arc::new(data),
            Arc::new(index),
            options,
        )
        .await
    }

    async fn open_labelled(
        label: String,
        data: Arc<dyn RandomAccess>,
        index: Arc<dyn RandomAccess>,
        options: &ArchiveOptions,
    ) -> Result<Self> {
        let reader = BlockReader::new(data, options.cache_blocks);
        let header = Header::read(&reader).await?;
        let index = AlignmentIndex::read_from(index.as_ref()).await?;

        if index.reference_count() != header.references().len() {
            tracing::warn!(
                "{}: index covers {} references, header declares {}",
                label,
                index.reference_count(),
                header.references().len()
            );
        }
        tracing::info!(
            "opened alignment archive {} ({} references, {:?} index)",
            label,
            header.references().len(),
            index.kind()
        );

        Ok(Self {
            label,
            reader,
            header,
            index,
            max_bins: options.max_bins,
            lifecycle: Lifecycle::default(),
        })
    }

    pub fn references(&self) -> Result<&[ReferenceSequence]> {
        self.lifecycle.ensure_open()?;
        Ok(self.header.references())
    }

    pub fn reference_index(&self, name: &str) -> Option<usize> {
        self.header.reference_index(name)
    }

    pub fn header_text(&self) -> Result<&str> {
        self.lifecycle.ensure_open()?;
        Ok(self.header.text())
    }

    pub fn region_to_chunks(&self, ref_index: usize, start: u64, end: u64) -> Result<Vec<Chunk>> {
        self.lifecycle.ensure_open()?;
        self.index.region_to_chunks(ref_index, start, end)
    }

    /// Records overlapping `[start, end)`, in file order, up to
    /// `options.max_records`.
    pub async fn get_reads_in_region(
        &self,
        ref_index: usize,
        start: u64,
        end: u64,
        options: &ReadQueryOptions,
    ) -> Result<Vec<AlignmentRecord>> {
        let mut records = Vec::new();
        if options.max_records == 0 {
            self.lifecycle.ensure_open()?;
            check_region(start, end)?;
            return Ok(records);
        }

        self.scan(ref_index, start, end, options.include_sequence, |record| {
            records.push(record);
            if records.len() >= options.max_records {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await?;

        tracing::debug!(
            "{}: {} records in ref {} [{}, {})",
            self.label,
            records.len(),
            ref_index,
            start,
            end
        );
        Ok(records)
    }

    /// Depth of coverage in `bin_size` bins, computed by sweeping record
    /// starts and ends.
    pub async fn get_coverage(
        &self,
        ref_index: usize,
        start: u64,
        end: u64,
        options: &CoverageOptions,
    ) -> Result<CoverageResult> {
        self.lifecycle.ensure_open()?;
        check_region(start, end)?;
        if options.bin_size == 0 {
            return Err(Error::InvalidInput("binSize must be positive".to_string()));
        }
        let bin_size = options.bin_size;
        let n_bins = (end - start).div_ceil(bin_size);
        check_bins(n_bins, self.max_bins)?;

        let mut events: Vec<(u64, i64)> = Vec::new();
        let mut read_count = 0u64;
        self.scan(ref_index, start, end, false, |record| {
            if record.flags.intersects(options.exclude_flags) {
                return ControlFlow::Continue(());
            }
            if let (Some(pos), Some(record_end)) = (record.pos, record.end()) {
                events.push((pos.max(start), 1));
                events.push((record_end.min(end), -1));
                read_count += 1;
            }
            ControlFlow::Continue(())
        })
        .await?;
        events.sort_unstable();

        let mut depth_sums = vec![0f64; n_bins as usize];

        let mut depth = 0i64;
        let mut prev = start;
        for (pos, delta) in events {
            if depth > 0 && pos > prev {
                add_segment(&mut depth_sums, start, bin_size, prev, pos, depth as f64);
            }
            depth += delta;
            prev = pos;
        }

        let mut stats = Stats::empty();
        let bins = depth_sums
            .into_iter()
            .enumerate()
            .map(|(i, sum)| {
                let bin_start = start + i as u64 * bin_size;
                let bin_end = (bin_start + bin_size).min(end);
                let coverage = sum / (bin_end - bin_start) as f64;
                stats.add(coverage, bin_end - bin_start);
                CoverageBin {
                    start: bin_start,
                    end: bin_end,
                    coverage,
                }
            })
            .collect();

        Ok(CoverageResult {
            bins,
            stats,
            read_count,
        })
    }

    /// Mapped and unmapped counts recorded in the index.
    pub fn index_stats(&self) -> Result<IndexStats> {
        self.lifecycle.ensure_open()?;
        let references = self
            .header
            .references()
            .iter()
            .enumerate()
            .map(|(i, reference)| {
                let meta = self.index.metadata(i);
                ReferenceCounts {
                    name: reference.name.clone(),
                    mapped: meta.map(|m| m.mapped),
                    unmapped: meta.map(|m| m.unmapped),
                }
            })
            .collect();
        Ok(IndexStats {
            references,
            unplaced_unmapped: self.index.unplaced_unmapped(),
        })
    }

    /// Close the handle and drop cached blocks. Later queries fail with
    /// [`Error::HandleClosed`].
    pub fn close(&self) {
        if self.lifecycle.close() {
            self.reader.invalidate_all();
            tracing::info!("closed alignment archive {}", self.label);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Feed every mapped record overlapping `[start, end)` to `visit` until
    /// it breaks or the region is exhausted.
    async fn scan<F>(
        &self,
        ref_index: usize,
        start: u64,
        end: u64,
        include_sequence: bool,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(AlignmentRecord) -> ControlFlow<()>,
    {
        self.lifecycle.ensure_open()?;
        let chunks = self.index.region_to_chunks(ref_index, start, end)?;

        for chunk in chunks {
            let mut cursor = self.reader.chunk(chunk);
            let mut pending = BytesMut::new();

            loop {
                while let Some(len) = record_len(&pending, 0).map_err(|e| relocate(e, chunk))? {
                    if pending.len() < len {
                        break;
                    }
                    let (record, used) =
                        parse_next(&pending, 0, include_sequence).map_err(|e| relocate(e, chunk))?;
                    pending.advance(used);

                    match record.ref_index {
                        Some(r) if r == ref_index => {}
                        Some(r) if r < ref_index => continue,
                        // Coordinate-sorted: nothing later can overlap
                        _ => return Ok(()),
                    }
                    match record.pos {
                        Some(pos) if pos >= end => return Ok(()),
                        Some(_) => {}
                        None => continue,
                    }
                    if record.overlaps(start, end) && visit(record).is_break() {
                        return Ok(());
                    }
                }

                match cursor.next_slice().await? {
                    Some(slice) => pending.extend_from_slice(&slice),
                    None => break,
                }
            }

            if !pending.is_empty() {
                let needed = match record_len(&pending, 0) {
                    Ok(Some(len)) => len,
                    _ => 4,
                };
                return Err(Error::TruncatedRecord {
                    offset: chunk.end.compressed(),
                    needed,
                    available: pending.len(),
                });
            }
        }
        Ok(())
    }
}

/// Replace buffer-relative offsets with the chunk's file offset
fn relocate(err: Error, chunk: Chunk) -> Error {
    match err {
        Error::TruncatedRecord {
            needed, available, ..
        } => Error::TruncatedRecord {
            offset: chunk.start.compressed(),
            needed,
            available,
        },
        Error::Format { message, .. } => Error::Format {
            offset: chunk.start.compressed(),
            message,
        },
        other => other,
    }
}

/// Add `depth` over `[from, to)` into the bins it overlaps
fn add_segment(sums: &mut [f64], start: u64, bin_size: u64, from: u64, to: u64, depth: f64) {
    let first = ((from - start) / bin_size) as usize;
    let last = ((to - 1 - start) / bin_size) as usize;
    for (i, sum) in sums.iter_mut().enumerate().take(last + 1).skip(first) {
        let bin_start = start + i as u64 * bin_size;
        let bin_end = bin_start + bin_size;
        let overlap = to.min(bin_end) - from.max(bin_start);
        *sum += depth * overlap as f64;
    }
}
