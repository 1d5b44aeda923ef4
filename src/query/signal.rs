use super::binning::{BinAccumulator, Stats, select_zoom_level};
use super::{ArchiveOptions, Lifecycle, check_bins, check_region};
use crate::formats::ReferenceSequence;
use crate::formats::bigwig::{
    BbiHeader, BlockRef, ChromTree, DecodedBlock, RTree, SignalInterval, Summary, ZoomLevel,
    ZoomRecord, decode, inflate,
};
use crate::storage::{LocalFile, RandomAccess};
use crate::{Error, Result};
use bytes::Bytes;
use moka::future::Cache;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBin {
    pub start: u64,
    pub end: u64,
    pub mean_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinnedSignal {
    pub bins: Vec<SignalBin>,
    pub bases_per_bin: f64,
    /// Reduction factor of the zoom level used, `None` for native data
    pub zoom_reduction: Option<u32>,
}

/// An open bigWig file.
pub struct SignalArchive {
    label: String,
    source: Arc<dyn RandomAccess>,
    header: BbiHeader,
    chroms: ChromTree,
    index: RTree,
    zoom_indexes: Vec<RTree>,
    blocks: Cache<u64, Arc<Bytes>>,
    max_raw_width: u64,
    max_bins: u64,
    lifecycle: Lifecycle,
}

impl SignalArchive {
    pub async fn open(source: Arc<dyn RandomAccess>, options: &ArchiveOptions) -> Result<Self> {
        Self::open_labelled("<memory>".to_string(), source, options).await
    }

    pub async fn open_path(path: impl AsRef<Path>, options: &ArchiveOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = LocalFile::open(path).await?;
        Self::open_labelled(path.display().to_string(), Arc::new(file), options).await
    }

    async fn open_labelled(
        label: String,
        source: Arc<dyn RandomAccess>,
        options: &ArchiveOptions,
    ) -> Result<Self> {
        let header = BbiHeader::read(source.as_ref()).await?;
        if header.full_index_offset == 0 || header.full_index_offset >= source.len() {
            return Err(Error::MissingIndex(PathBuf::from(&label)));
        }

        let chroms = ChromTree::read(source.as_ref(), header.chrom_tree_offset, header.endian).await?;
        let index = RTree::read(
            source.as_ref(),
            header.full_index_offset,
            header.endian,
            header.uncompress_buf_size,
        )
        .await?;

        let mut zoom_indexes = Vec::with_capacity(header.zoom_levels.len());
        for level in &header.zoom_levels {
            zoom_indexes.push(
                RTree::read(
                    source.as_ref(),
                    level.index_offset,
                    header.endian,
                    header.uncompress_buf_size,
                )
                .await?,
            );
        }

        tracing::info!(
            "opened signal archive {} ({} references, {} zoom levels, {} blocks)",
            label,
            chroms.references().len(),
            zoom_indexes.len(),
            index.item_count()
        );

        let blocks = Cache::builder()
            .max_capacity(options.cache_blocks.max(1))
            .build();
        Ok(Self {
            label,
            source,
            header,
            chroms,
            index,
            zoom_indexes,
            blocks,
            max_raw_width: options.max_raw_width,
            max_bins: options.max_bins,
            lifecycle: Lifecycle::default(),
        })
    }

    pub fn references(&self) -> Result<&[ReferenceSequence]> {
        self.lifecycle.ensure_open()?;
        Ok(self.chroms.references())
    }

    pub fn reference_index(&self, name: &str) -> Option<usize> {
        self.chroms.reference_index(name)
    }

    /// Reference with chromosome id `ref_index`. Ids need not be contiguous.
    pub fn reference(&self, ref_index: usize) -> Result<Option<&ReferenceSequence>> {
        self.lifecycle.ensure_open()?;
        Ok(self.chroms.reference(ref_index))
    }

    pub fn zoom_levels(&self) -> Result<&[ZoomLevel]> {
        self.lifecycle.ensure_open()?;
        Ok(&self.header.zoom_levels)
    }

    /// Whole-file statistics, if the file carries a total summary
    pub fn summary(&self) -> Result<Option<Summary>> {
        self.lifecycle.ensure_open()?;
        Ok(self.header.summary)
    }

    /// Data blocks overlapping `[start, end)`, from the full-resolution
    /// index or from zoom level `zoom`.
    pub fn region_to_blocks(
        &self,
        ref_index: usize,
        start: u64,
        end: u64,
        zoom: Option<usize>,
    ) -> Result<Vec<BlockRef>> {
        self.lifecycle.ensure_open()?;
        check_region(start, end)?;
        let tree = match zoom {
            None => &self.index,
            Some(level) => self.zoom_indexes.get(level).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "zoom level {} out of range, file has {}",
                    level,
                    self.zoom_indexes.len()
                ))
            })?,
        };
        Ok(self.blocks_in(tree, ref_index, start, end))
    }

    /// Native-resolution intervals overlapping `[start, end)`.
    pub async fn get_raw_signal(
        &self,
        ref_index: usize,
        start: u64,
        end: u64,
    ) -> Result<Vec<SignalInterval>> {
        self.lifecycle.ensure_open()?;
        check_region(start, end)?;
        let width = end - start;
        if width > self.max_raw_width {
            return Err(Error::RegionTooLarge {
                start,
                end,
                width,
                max: self.max_raw_width,
            });
        }
        self.intervals(ref_index, start, end).await
    }

    /// Mean signal in `num_bins` equal bins, read from the coarsest zoom
    /// level that still resolves each bin.
    pub async fn get_binned_signal(
        &self,
        ref_index: usize,
        start: u64,
        end: u64,
        num_bins: u32,
    ) -> Result<BinnedSignal> {
        self.lifecycle.ensure_open()?;
        check_region(start, end)?;
        if num_bins == 0 {
            return Err(Error::InvalidInput("bins must be positive".to_string()));
        }
        check_bins(u64::from(num_bins), self.max_bins)?;

        let width = end - start;
        let factors: Vec<u32> = self
            .header
            .zoom_levels
            .iter()
            .map(|z| z.reduction_factor)
            .collect();
        let level = select_zoom_level(width, num_bins, &factors);
        let mut acc = BinAccumulator::new(start, end, num_bins);

        match level {
            Some(level) => {
                tracing::debug!(
                    "{}: binning [{}, {}) into {} from zoom x{}",
                    self.label,
                    start,
                    end,
                    num_bins,
                    factors[level]
                );
                for record in self.zoom_records(level, ref_index, start, end).await? {
                    acc.add(
                        record.start,
                        record.end,
                        f64::from(record.sum_data),
                        f64::from(record.valid_count),
                    );
                }
            }
            None => {
                for interval in self.intervals(ref_index, start, end).await? {
                    let len = (interval.end - interval.start) as f64;
                    acc.add(
                        interval.start,
                        interval.end,
                        f64::from(interval.value) * len,
                        len,
                    );
                }
            }
        }

        let bins = acc
            .finish()
            .into_iter()
            .map(|(start, end, mean_value)| SignalBin {
                start,
                end,
                mean_value,
            })
            .collect();
        Ok(BinnedSignal {
            bins,
            bases_per_bin: width as f64 / f64::from(num_bins),
            zoom_reduction: level.map(|l| factors[l]),
        })
    }

    /// Length-weighted statistics over `[start, end)`.
    ///
    /// Zoom summaries are used when every zoom record touching the region
    /// lies inside it; otherwise the raw intervals are decoded.
    pub async fn get_stats(&self, ref_index: usize, start: u64, end: u64) -> Result<Stats> {
        self.lifecycle.ensure_open()?;
        check_region(start, end)?;
        let width = end - start;

        let mut candidates: Vec<usize> = (0..self.header.zoom_levels.len())
            .filter(|&i| u64::from(self.header.zoom_levels[i].reduction_factor) <= width)
            .collect();
        candidates.sort_by_key(|&i| std::cmp::Reverse(self.header.zoom_levels[i].reduction_factor));

        for level in candidates {
            let records = self.zoom_records(level, ref_index, start, end).await?;
            if records.iter().all(|r| r.start >= start && r.end <= end) {
                let mut stats = Stats::empty();
                for r in &records {
                    stats.add_summary(
                        u64::from(r.valid_count),
                        f64::from(r.sum_data),
                        f64::from(r.sum_squares),
                        f64::from(r.min_val),
                        f64::from(r.max_val),
                    );
                }
                tracing::debug!(
                    "{}: stats for [{}, {}) from zoom x{}",
                    self.label,
                    start,
                    end,
                    self.header.zoom_levels[level].reduction_factor
                );
                return Ok(stats);
            }
        }

        let mut stats = Stats::empty();
        for interval in self.intervals(ref_index, start, end).await? {
            let overlap = interval.end.min(end) - interval.start.max(start);
            stats.add(f64::from(interval.value), overlap);
        }
        Ok(stats)
    }

    /// Close the handle and drop cached blocks.
    pub fn close(&self) {
        if self.lifecycle.close() {
            self.blocks.invalidate_all();
            tracing::info!("closed signal archive {}", self.label);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn blocks_in(&self, tree: &RTree, ref_index: usize, start: u64, end: u64) -> Vec<BlockRef> {
        if self.chroms.reference(ref_index).is_none() {
            return Vec::new();
        }
        let Ok(chrom) = u32::try_from(ref_index) else {
            return Vec::new();
        };
        tree.region_to_blocks(chrom, clamp_u32(start), clamp_u32(end))
    }

    async fn load_block(&self, block: BlockRef) -> Result<Arc<Bytes>> {
        self.blocks
            .try_get_with(block.file_offset, async {
                tracing::trace!("cache miss, reading signal block at {}", block.file_offset);
                let raw = self
                    .source
                    .read_exact_at(block.file_offset, block.compressed_size as usize)
                    .await?;
                let data = inflate(
                    &raw,
                    self.header.is_compressed(),
                    block.file_offset,
                    block.uncompressed_size as usize,
                )?;
                Ok::<_, Error>(Arc::new(data))
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Load and decode every block of `tree` overlapping the region.
    async fn decode_overlapping(
        &self,
        tree: &RTree,
        is_zoom: bool,
        ref_index: usize,
        start: u64,
        end: u64,
    ) -> Result<Vec<DecodedBlock>> {
        let mut out = Vec::new();
        for block in self.blocks_in(tree, ref_index, start, end) {
            let data = self.load_block(block).await?;
            out.push(decode(&data, is_zoom, self.header.endian, block.file_offset)?);
        }
        Ok(out)
    }

    async fn intervals(&self, ref_index: usize, start: u64, end: u64) -> Result<Vec<SignalInterval>> {
        let mut out = Vec::new();
        for block in self
            .decode_overlapping(&self.index, false, ref_index, start, end)
            .await?
        {
            if let DecodedBlock::Intervals(decoded) = block {
                out.extend(
                    decoded
                        .into_iter()
                        .filter(|i| i.ref_index == ref_index && i.start < end && i.end > start),
                );
            }
        }
        Ok(out)
    }

    async fn zoom_records(
        &self,
        level: usize,
        ref_index: usize,
        start: u64,
        end: u64,
    ) -> Result<Vec<ZoomRecord>> {
        let Some(tree) = self.zoom_indexes.get(level) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for block in self.decode_overlapping(tree, true, ref_index, start, end).await? {
            if let DecodedBlock::Zoom(decoded) = block {
                out.extend(
                    decoded
                        .into_iter()
                        .filter(|r| r.ref_index == ref_index && r.start < end && r.end > start),
                );
            }
        }
        Ok(out)
    }
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
