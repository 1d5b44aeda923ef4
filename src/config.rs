use crate::query::ArchiveOptions;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "trackr")]
#[command(about = "Region queries over indexed BAM and bigWig archives")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "TRACKR_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "TRACKR_PORT", default_value = "8080")]
    pub port: u16,

    /// Directory containing .bam/.bai and .bw files
    #[arg(long, env = "TRACKR_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Enable CORS for all origins
    #[arg(long, env = "TRACKR_CORS", default_value = "true")]
    pub cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Decompressed blocks cached per open archive
    #[arg(long, env = "TRACKR_CACHE_BLOCKS", default_value = "8")]
    pub cache_blocks: u64,

    /// Widest region a raw signal query may span, in bases
    #[arg(long, env = "TRACKR_MAX_RAW_WIDTH", default_value = "10000000")]
    pub max_raw_width: u64,

    /// Upper bound on output bins in one binned signal or coverage query
    #[arg(long, env = "TRACKR_MAX_BINS", default_value = "1000000")]
    pub max_bins: u64,

    /// Upper bound on records returned by one reads query
    #[arg(long, env = "TRACKR_MAX_RECORDS", default_value = "10000")]
    pub max_records: usize,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            cache_blocks: self.cache_blocks,
            max_raw_width: self.max_raw_width,
            max_bins: self.max_bins,
        }
    }
}
