//! bigWig signal archives.
//!
//! The file opens with a fixed header pointing at a chromosome B+ tree, the
//! full-resolution data and its R-tree, and one header per zoom level. Every
//! index is embedded in the file itself.

mod block;
mod chrom_tree;
mod endian;
mod header;
mod rtree;

pub use block::{
    DecodedBlock, SignalInterval, ZoomRecord, decode, decode_intervals, decode_zoom_records,
    inflate,
};
pub use chrom_tree::{CHROM_TREE_MAGIC, ChromTree};
pub use endian::Endian;
pub use header::{BIGWIG_MAGIC, BbiHeader, Summary, ZoomLevel};
pub use rtree::{BlockRef, RTREE_MAGIC, RTree};
