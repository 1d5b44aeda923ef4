//! Region queries over indexed genomic archives.
//!
//! `trackr` opens BAM alignment files (with a BAI or CSI index) and bigWig
//! signal files, and answers `[start, end)` queries by reading only the
//! compressed blocks the index points at. Results come back as typed
//! records, intervals, bins and summary statistics.

pub mod bgzf;
pub mod config;
pub mod error;
pub mod formats;
pub mod handlers;
pub mod query;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
