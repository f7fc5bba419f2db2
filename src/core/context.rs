use std::sync::Arc;
use std::time::{Duration, Instant};
use crate::column::codec::{BincodeCodec, FormatVersion, ObjectCodec};
use crate::compression::compress::CompressionType;
use crate::core::config::StoreConfig;
use crate::core::error::Result;
use crate::memory::monitor::{MemoryMonitor, NoopMonitor};
use crate::memory::scheduler::{AgePriority, PriorityPolicy, SwapScheduler};
use crate::storage::layout::SwapLayout;

/// Collaborators shared by every table, fragment and column built from it.
pub struct StoreContext {
    pub config: StoreConfig,
    pub layout: SwapLayout,
    pub monitor: Arc<dyn MemoryMonitor>,
    pub codec: Arc<dyn ObjectCodec>,
    pub priority: Arc<dyn PriorityPolicy>,
    /// New fragments and blob columns register here when set
    pub scheduler: Option<Arc<SwapScheduler>>,
    epoch: Instant,
}

impl StoreContext {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let layout = SwapLayout::new(config.swap_dir.clone())?;
        let priority = Arc::new(AgePriority::new(config.alive_window));

        Ok(StoreContext {
            config,
            layout,
            monitor: Arc::new(NoopMonitor),
            codec: Arc::new(BincodeCodec),
            priority,
            scheduler: None,
            epoch: Instant::now(),
        })
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn MemoryMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ObjectCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_priority(mut self, priority: Arc<dyn PriorityPolicy>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<SwapScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Milliseconds since this context was created; used for access stamps.
    pub fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn idle_since(&self, stamp: u64) -> Duration {
        Duration::from_millis(self.now_millis().saturating_sub(stamp))
    }
}

/// What a column needs from its fragment: the shared context plus the
/// serializer version and compression its fragment reads and writes.
#[derive(Clone)]
pub struct ColumnEnv {
    pub ctx: Arc<StoreContext>,
    pub version: FormatVersion,
    pub compression: CompressionType,
}

impl ColumnEnv {
    pub fn new(ctx: Arc<StoreContext>, version: FormatVersion) -> Self {
        let compression = ctx.config.compression;
        ColumnEnv { ctx, version, compression }
    }

    /// Environment for files written elsewhere, e.g. a reopened snapshot
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }
}
