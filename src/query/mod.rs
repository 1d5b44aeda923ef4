//! Region queries over open archive handles.
//!
//! A handle parses its header and index once at open time and shares them
//! read-only across concurrent queries. Each handle owns a bounded cache of
//! decompressed blocks; nothing else is mutable after open.
//!
//! All coordinates are zero-based and half-open. Queries on a reference the
//! archive does not know return an empty result.

mod alignment;
mod binning;
mod signal;
mod stream;

pub use alignment::{
    AlignmentArchive, CoverageBin, CoverageOptions, CoverageResult, IndexStats, ReadQueryOptions,
    ReferenceCounts,
};
pub use binning::{Stats, bin_edges, select_zoom_level};
pub use signal::{BinnedSignal, SignalArchive, SignalBin};
pub use stream::{
    BinnedSignalWindows, CoverageWindows, SignalStatsWindows, StreamingAggregator, WindowQuery,
    WindowResult,
};

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Settings shared by every handle opened with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Decompressed blocks kept per handle
    pub cache_blocks: u64,
    /// Widest region a raw signal query may span
    pub max_raw_width: u64,
    /// Most output bins one binned signal or coverage query may produce
    pub max_bins: u64,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            cache_blocks: 8,
            max_raw_width: 10_000_000,
            max_bins: 1_000_000,
        }
    }
}

/// Reject `start > end` before any I/O.
pub(crate) fn check_region(start: u64, end: u64) -> Result<()> {
    if start > end {
        return Err(Error::invalid_region(start as i64, end as i64, "start is after end"));
    }
    Ok(())
}

/// Reject output bin counts above `max` before allocating them.
pub(crate) fn check_bins(count: u64, max: u64) -> Result<()> {
    if count > max {
        return Err(Error::InvalidInput(format!(
            "{} output bins requested, at most {} allowed",
            count, max
        )));
    }
    Ok(())
}

/// Open/closed state of a handle.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    closed: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::HandleClosed);
        }
        Ok(())
    }

    /// Returns false if the handle was already closed
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
