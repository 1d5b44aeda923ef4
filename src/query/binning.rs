//! Zoom selection, output bins and summary statistics. Pure functions only.

use serde::Serialize;

/// Index of the coarsest zoom level whose reduction factor does not exceed
/// the requested bases per bin, or `None` to use native resolution.
pub fn select_zoom_level(width: u64, num_bins: u32, reduction_factors: &[u32]) -> Option<usize> {
    if num_bins == 0 {
        return None;
    }
    let bases_per_bin = width / u64::from(num_bins);
    reduction_factors
        .iter()
        .enumerate()
        .filter(|&(_, &factor)| factor > 0 && u64::from(factor) <= bases_per_bin)
        .max_by_key(|&(_, &factor)| factor)
        .map(|(i, _)| i)
}

/// `n` contiguous bins over `[start, end)`; widths differ by at most one base.
pub fn bin_edges(start: u64, end: u64, n: u32) -> Vec<(u64, u64)> {
    let width = u128::from(end.saturating_sub(start));
    let n = u128::from(n);
    let edge = |i: u128| start + (i * width / n.max(1)) as u64;
    (0..n).map(|i| (edge(i), edge(i + 1))).collect()
}

/// Accumulates length-weighted values into fixed output bins.
///
/// Each input spans `[start, end)` and carries a total `weighted` sum and a
/// total `covered` base count, which are split across the bins it touches in
/// proportion to the overlap.
#[derive(Debug, Clone)]
pub(crate) struct BinAccumulator {
    edges: Vec<(u64, u64)>,
    weighted: Vec<f64>,
    covered: Vec<f64>,
}

impl BinAccumulator {
    pub(crate) fn new(start: u64, end: u64, n: u32) -> Self {
        let edges = bin_edges(start, end, n);
        let len = edges.len();
        Self {
            edges,
            weighted: vec![0.0; len],
            covered: vec![0.0; len],
        }
    }

    pub(crate) fn add(&mut self, start: u64, end: u64, weighted: f64, covered: f64) {
        if end <= start {
            return;
        }
        let span = (end - start) as f64;
        let first = self.edges.partition_point(|&(_, bin_end)| bin_end <= start);
        for (i, &(bin_start, bin_end)) in self.edges.iter().enumerate().skip(first) {
            if bin_start >= end {
                break;
            }
            let overlap = end.min(bin_end).saturating_sub(start.max(bin_start));
            if overlap == 0 {
                continue;
            }
            let frac = overlap as f64 / span;
            self.weighted[i] += weighted * frac;
            self.covered[i] += covered * frac;
        }
    }

    /// Bins with the mean over covered bases; bins with no data read 0
    pub(crate) fn finish(self) -> Vec<(u64, u64, f64)> {
        self.edges
            .into_iter()
            .zip(self.weighted.into_iter().zip(self.covered))
            .map(|((start, end), (weighted, covered))| {
                let mean = if covered > 0.0 { weighted / covered } else { 0.0 };
                (start, end, mean)
            })
            .collect()
    }
}

/// Length-weighted summary statistics.
///
/// `count` is the number of bases contributing; `std` is the population
/// standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    #[serde(skip)]
    sum_squares: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::empty()
    }
}

impl Stats {
    pub fn empty() -> Self {
        Stats {
            count: 0,
            sum: 0.0,
            mean: 0.0,
            min: 0.0,
            max: 0.0,
            std: 0.0,
            sum_squares: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn sum_squares(&self) -> f64 {
        self.sum_squares
    }

    /// Add `value` covering `bases` bases
    pub fn add(&mut self, value: f64, bases: u64) {
        if bases == 0 {
            return;
        }
        let w = bases as f64;
        self.add_summary(bases, value * w, value * value * w, value, value);
    }

    /// Add a pre-aggregated summary
    pub fn add_summary(&mut self, count: u64, sum: f64, sum_squares: f64, min: f64, max: f64) {
        if count == 0 {
            return;
        }
        if self.count == 0 {
            self.min = min;
            self.max = max;
        } else {
            self.min = self.min.min(min);
            self.max = self.max.max(max);
        }
        self.count += count;
        self.sum += sum;
        self.sum_squares += sum_squares;
        self.refresh();
    }

    /// Combine statistics of two disjoint regions.
    pub fn merge(&self, other: &Stats) -> Stats {
        let mut merged = *self;
        merged.add_summary(other.count, other.sum, other.sum_squares, other.min, other.max);
        merged
    }

    fn refresh(&mut self) {
        let n = self.count as f64;
        self.mean = self.sum / n;
        let variance = self.sum_squares / n - self.mean * self.mean;
        self.std = variance.max(0.0).sqrt();
    }
}
