//! Pull-based traversal of wide regions in fixed windows.
//!
//! Each call to [`StreamingAggregator::next`] runs one sub-query and hands
//! its result back before the next window is touched, so peak memory is one
//! window's worth of decoded data regardless of the total width. Dropping
//! the aggregator cancels the traversal.

use super::alignment::{AlignmentArchive, CoverageOptions, CoverageResult};
use super::binning::Stats;
use super::check_region;
use super::signal::{BinnedSignal, SignalArchive};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// A region query that can be run window by window.
#[async_trait]
pub trait WindowQuery: Send + Sync {
    type Output: Send;

    async fn query(&self, ref_index: usize, start: u64, end: u64) -> Result<Self::Output>;
}

/// The result for one window `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult<T> {
    pub start: u64,
    pub end: u64,
    pub value: T,
}

pub struct StreamingAggregator<Q> {
    query: Q,
    ref_index: usize,
    next_start: u64,
    end: u64,
    window: u64,
}

impl<Q: WindowQuery> StreamingAggregator<Q> {
    pub fn new(query: Q, ref_index: usize, start: u64, end: u64, window: u64) -> Result<Self> {
        check_region(start, end)?;
        if window == 0 {
            return Err(Error::InvalidInput("window width must be positive".to_string()));
        }
        Ok(Self {
            query,
            ref_index,
            next_start: start,
            end,
            window,
        })
    }

    /// Windows not yet yielded
    pub fn remaining_windows(&self) -> u64 {
        (self.end - self.next_start).div_ceil(self.window)
    }

    /// Run the next window's query. Returns `None` once the region is
    /// exhausted; after an error the traversal ends.
    pub async fn next(&mut self) -> Result<Option<WindowResult<Q::Output>>> {
        if self.next_start >= self.end {
            return Ok(None);
        }
        let start = self.next_start;
        let end = start.saturating_add(self.window).min(self.end);

        match self.query.query(self.ref_index, start, end).await {
            Ok(value) => {
                self.next_start = end;
                Ok(Some(WindowResult { start, end, value }))
            }
            Err(e) => {
                self.next_start = self.end;
                Err(e)
            }
        }
    }
}

impl<Q: WindowQuery<Output = Stats>> StreamingAggregator<Q> {
    /// Drain every window and merge the per-window statistics.
    pub async fn merge_all(mut self) -> Result<Stats> {
        let mut total = Stats::empty();
        while let Some(window) = self.next().await? {
            total = total.merge(&window.value);
        }
        Ok(total)
    }
}

/// Signal statistics per window.
pub struct SignalStatsWindows(pub Arc<SignalArchive>);

#[async_trait]
impl WindowQuery for SignalStatsWindows {
    type Output = Stats;

    async fn query(&self, ref_index: usize, start: u64, end: u64) -> Result<Stats> {
        self.0.get_stats(ref_index, start, end).await
    }
}

/// Binned signal per window.
pub struct BinnedSignalWindows {
    pub archive: Arc<SignalArchive>,
    pub bins_per_window: u32,
}

#[async_trait]
impl WindowQuery for BinnedSignalWindows {
    type Output = BinnedSignal;

    async fn query(&self, ref_index: usize, start: u64, end: u64) -> Result<BinnedSignal> {
        self.archive
            .get_binned_signal(ref_index, start, end, self.bins_per_window)
            .await
    }
}

/// Alignment coverage per window.
pub struct CoverageWindows {
    pub archive: Arc<AlignmentArchive>,
    pub options: CoverageOptions,
}

#[async_trait]
impl WindowQuery for CoverageWindows {
    type Output = CoverageResult;

    async fn query(&self, ref_index: usize, start: u64, end: u64) -> Result<CoverageResult> {
        self.archive
            .get_coverage(ref_index, start, end, &self.options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the windows it is asked for; fails on a chosen window start.
    struct Recorder {
        seen: Mutex<Vec<(u64, u64)>>,
        fail_at: Option<u64>,
    }

    #[async_trait]
    impl WindowQuery for Recorder {
        type Output = Stats;

        async fn query(&self, _ref_index: usize, start: u64, end: u64) -> Result<Stats> {
            if self.fail_at == Some(start) {
                return Err(Error::HandleClosed);
            }
            self.seen.lock().unwrap().push((start, end));
            let mut stats = Stats::empty();
            stats.add(1.0, end - start);
            Ok(stats)
        }
    }

    fn recorder(fail_at: Option<u64>) -> Recorder {
        Recorder {
            seen: Mutex::new(Vec::new()),
            fail_at,
        }
    }

    #[tokio::test]
    async fn test_windows_cover_region() {
        let mut agg = StreamingAggregator::new(recorder(None), 0, 100, 350, 100).unwrap();
        assert_eq!(agg.remaining_windows(), 3);

        let mut spans = Vec::new();
        while let Some(w) = agg.next().await.unwrap() {
            spans.push((w.start, w.end));
            assert_eq!(w.value.count, w.end - w.start);
        }
        assert_eq!(spans, vec![(100, 200), (200, 300), (300, 350)]);
        assert!(agg.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_all() {
        let agg = StreamingAggregator::new(recorder(None), 0, 0, 1000, 300).unwrap();
        let stats = agg.merge_all().await.unwrap();
        assert_eq!(stats.count, 1000);
        assert_eq!(stats.mean, 1.0);
    }

    #[tokio::test]
    async fn test_error_ends_traversal() {
        let mut agg = StreamingAggregator::new(recorder(Some(100)), 0, 0, 300, 100).unwrap();
        assert!(agg.next().await.unwrap().is_some());
        assert_eq!(agg.next().await.unwrap_err().kind(), "HandleClosedError");
        assert!(agg.next().await.unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert_eq!(
            StreamingAggregator::new(recorder(None), 0, 10, 5, 100).err().unwrap().kind(),
            "InvalidRegionError"
        );
        assert_eq!(
            StreamingAggregator::new(recorder(None), 0, 0, 5, 0).err().unwrap().kind(),
            "InvalidInput"
        );
    }
}
