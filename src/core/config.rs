use std::path::PathBuf;
use std::time::Duration;
use crate::column::codec::FormatVersion;
use crate::compression::compress::CompressionType;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Where private swap files go. `None` uses a temp dir removed on drop.
    pub swap_dir: Option<PathBuf>,
    pub compression: CompressionType,
    pub format_version: FormatVersion,
    pub use_mmap: bool,

    // Blob columns
    pub working_set_size: usize,

    // Producer / consumer coordination
    pub more_rows_poll: Duration,
    pub notify_min_rows: usize,
    pub notify_max_rows: usize,
    pub backpressure_rows: usize,

    // Swap priority
    pub alive_window: Duration,

    pub verify_snapshot_checksums: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            swap_dir: None,
            compression: CompressionType::LZ4,
            format_version: FormatVersion::V2,
            use_mmap: true,

            working_set_size: 16,

            more_rows_poll: Duration::from_millis(100),
            notify_min_rows: 256,
            notify_max_rows: 2048,
            backpressure_rows: 2048,

            alive_window: Duration::from_secs(30),

            verify_snapshot_checksums: true,
        }
    }
}

impl StoreConfig {
    pub fn with_swap_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.swap_dir = Some(dir.into());
        self
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }
}
