use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::error;
use crate::core::context::ColumnEnv;
use crate::core::error::{Error, ErrorKind, Result};
use crate::mmap::mmap_file::read_range;

/// Typed in-memory storage behind a column.
pub trait ColumnBuffer: Send + Sync + Sized + 'static {
    fn rows(&self) -> usize;

    /// Approximate bytes held, for memory accounting
    fn heap_size(&self) -> usize;

    fn encode(&self, env: &ColumnEnv) -> Result<Vec<u8>>;

    fn decode(bytes: &[u8], rows: usize, env: &ColumnEnv) -> Result<Self>;
}

/// Where a column's bytes live inside a swap file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapExtent {
    pub path: Arc<PathBuf>,
    pub offset: u64,
    pub length: u32,
}

enum Residency<B> {
    Resident(B),
    Evicted,
    Disposed,
}

struct Slot<B> {
    residency: Residency<B>,
    extent: Option<SwapExtent>,
    /// Diagnostic from the last failed reload or snapshot bind
    missing: Option<String>,
    /// Bytes currently charged to the memory monitor
    charged: usize,
}

/// Lock-guarded residency state shared by every buffer-backed column.
///
/// `Resident -> Evicted` only happens once an extent is known, so an evicted
/// column can always be reloaded unless its file went missing.
pub struct ColumnSlot<B: ColumnBuffer> {
    slot: RwLock<Slot<B>>,
    len: AtomicUsize,
    capacity: usize,
    serializable: AtomicBool,
    env: ColumnEnv,
}

impl<B: ColumnBuffer> ColumnSlot<B> {
    pub fn new(buffer: B, capacity: usize, env: ColumnEnv) -> Self {
        ColumnSlot {
            len: AtomicUsize::new(buffer.rows()),
            slot: RwLock::new(Slot {
                residency: Residency::Resident(buffer),
                extent: None,
                missing: None,
                charged: 0,
            }),
            capacity,
            serializable: AtomicBool::new(true),
            env,
        }
    }

    pub fn env(&self) -> &ColumnEnv {
        &self.env
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_serializable(&self) -> bool {
        self.serializable.load(Ordering::Acquire)
    }

    /// One-way: a column never becomes serializable again.
    pub fn mark_unserializable(&self) {
        self.serializable.store(false, Ordering::Release);
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.slot.read().residency, Residency::Resident(_))
    }

    pub fn missing(&self) -> Option<String> {
        self.slot.read().missing.clone()
    }

    pub fn check_row(&self, row: usize) -> Result<()> {
        let len = self.len();
        if row >= len {
            return Err(Error::new(
                ErrorKind::OutOfBounds,
                format!("row {} beyond column length {}", row, len),
            ));
        }
        Ok(())
    }

    /// Run `f` against the buffer, reloading it first if evicted.
    pub fn read<R>(&self, f: impl FnOnce(&B) -> R) -> Result<R> {
        {
            let slot = self.slot.read();
            match &slot.residency {
                Residency::Resident(buffer) => return Ok(f(buffer)),
                Residency::Disposed => return Err(Error::disposed("column")),
                Residency::Evicted => {}
            }
        }

        // Signal before taking the column lock: the monitor may be waiting
        // on a swapper that needs this very lock.
        self.env.ctx.monitor.will_block_on_io();

        let mut slot = self.slot.write();
        if matches!(slot.residency, Residency::Evicted) {
            self.reload(&mut slot)?;
        }
        let slot = RwLockWriteGuard::downgrade(slot);
        match &slot.residency {
            Residency::Resident(buffer) => Ok(f(buffer)),
            Residency::Disposed => Err(Error::disposed("column")),
            Residency::Evicted => Err(Error::new(ErrorKind::DataMissing, "column not resident".to_string())),
        }
    }

    /// Mutate the buffer (producer side). Keeps `len` in step with the buffer.
    pub fn write<R>(&self, f: impl FnOnce(&mut B) -> Result<R>) -> Result<R> {
        let evicted = matches!(self.slot.read().residency, Residency::Evicted);
        if evicted {
            self.env.ctx.monitor.will_block_on_io();
        }

        let mut slot = self.slot.write();
        if matches!(slot.residency, Residency::Evicted) {
            self.reload(&mut slot)?;
        }
        match &mut slot.residency {
            Residency::Resident(buffer) => {
                let out = f(buffer)?;
                self.len.store(buffer.rows(), Ordering::Release);
                Ok(out)
            }
            Residency::Disposed => Err(Error::disposed("column")),
            Residency::Evicted => Err(Error::new(ErrorKind::DataMissing, "column not resident".to_string())),
        }
    }

    /// Encoded and compressed payload, or `None` when not serializable.
    pub fn payload(&self) -> Result<Option<Vec<u8>>> {
        if !self.is_serializable() {
            return Ok(None);
        }
        let raw = self.read(|buffer| buffer.encode(&self.env))??;
        Ok(Some(self.env.compression.compress(&raw)?))
    }

    /// Record `extent` (if given) and drop the buffer. A column with no known
    /// extent or no rows stays resident. Returns whether memory was freed.
    pub fn evict(&self, extent: Option<SwapExtent>) -> bool {
        let mut slot = self.slot.write();
        if let Some(extent) = extent {
            slot.extent = Some(extent);
        }
        if slot.extent.is_none() || self.len() == 0 {
            return false;
        }
        if !matches!(slot.residency, Residency::Resident(_)) {
            return false;
        }
        slot.residency = Residency::Evicted;
        let charged = std::mem::take(&mut slot.charged);
        self.env.ctx.monitor.release(charged);
        true
    }

    /// Attach to bytes already on disk without loading them.
    pub fn bind(&self, extent: SwapExtent, rows: usize) {
        let mut slot = self.slot.write();
        if matches!(slot.residency, Residency::Disposed) {
            return;
        }
        slot.residency = Residency::Evicted;
        slot.extent = Some(extent);
        slot.missing = None;
        self.len.store(rows, Ordering::Release);
    }

    /// Mark the column as unrecoverable; reads report `DataMissing`.
    pub fn mark_missing(&self, diagnostic: String, rows: usize) {
        let mut slot = self.slot.write();
        if matches!(slot.residency, Residency::Disposed) {
            return;
        }
        slot.residency = Residency::Evicted;
        slot.extent = None;
        slot.missing = Some(diagnostic);
        self.len.store(rows, Ordering::Release);
    }

    /// Charge the sealed buffer to the memory monitor.
    pub fn complete(&self) {
        let mut slot = self.slot.write();
        if let Residency::Resident(buffer) = &slot.residency {
            let size = buffer.heap_size();
            if size > slot.charged {
                self.env.ctx.monitor.charge(size - slot.charged);
                slot.charged = size;
            }
        }
    }

    pub fn dispose(&self) {
        let mut slot = self.slot.write();
        slot.residency = Residency::Disposed;
        slot.extent = None;
        let charged = std::mem::take(&mut slot.charged);
        self.env.ctx.monitor.release(charged);
    }

    pub fn heap_size(&self) -> usize {
        match &self.slot.read().residency {
            Residency::Resident(buffer) => buffer.heap_size(),
            _ => 0,
        }
    }

    fn reload(&self, slot: &mut Slot<B>) -> Result<()> {
        let extent = match &slot.extent {
            Some(extent) => extent.clone(),
            None => {
                let reason = slot
                    .missing
                    .clone()
                    .unwrap_or_else(|| "column has no swap extent".to_string());
                return Err(Error::new(ErrorKind::DataMissing, reason));
            }
        };

        match self.load_extent(&extent) {
            Ok(buffer) => {
                let size = buffer.heap_size();
                self.env.ctx.monitor.charge(size);
                slot.charged = size;
                slot.residency = Residency::Resident(buffer);
                slot.missing = None;
                Ok(())
            }
            Err(err) => {
                let diagnostic = describe_swap_file(&extent, &err);
                error!(
                    path = %extent.path.display(),
                    offset = extent.offset,
                    length = extent.length,
                    error = %err,
                    "failed to reload swapped column: {}",
                    diagnostic
                );
                slot.missing = Some(diagnostic.clone());
                Err(Error::new(ErrorKind::DataMissing, diagnostic))
            }
        }
    }

    fn load_extent(&self, extent: &SwapExtent) -> Result<B> {
        let use_mmap = self.env.ctx.config.use_mmap;
        let packed = read_range(&extent.path, extent.offset, extent.length as usize, use_mmap)?;
        let raw = self.env.compression.decompress(&packed)?;
        B::decode(&raw, self.len(), &self.env)
    }
}

/// Human-readable account of a swap file's state for "data missing" notices.
fn describe_swap_file(extent: &SwapExtent, err: &Error) -> String {
    let expected = extent.offset + extent.length as u64;
    match std::fs::metadata(extent.path.as_path()) {
        Ok(meta) => {
            let modified = meta
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "swap file {} unreadable (size {} bytes, needs at least {}, modified {}): {}",
                extent.path.display(),
                meta.len(),
                expected,
                modified,
                err
            )
        }
        Err(_) => format!(
            "swap file {} is missing (needed {} bytes): {}",
            extent.path.display(),
            expected,
            err
        ),
    }
}

/// Grow `values` by 1.5x, capped at `max`, so one more element fits.
pub fn reserve_one<T>(values: &mut Vec<T>, max: usize) -> Result<()> {
    let len = values.len();
    if len >= max {
        return Err(Error::new(
            ErrorKind::CapacityExceeded,
            format!("column is full at {} rows", max),
        ));
    }
    if len == values.capacity() {
        let cap = values.capacity();
        let grown = (cap + cap / 2).max(cap + 1).max(16).min(max);
        values.reserve_exact(grown - len);
    }
    Ok(())
}

/// Split off the first `n` bytes of `input`.
pub fn take_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if input.len() < n {
        return Err(Error::new(
            ErrorKind::Parse,
            format!("column payload truncated: wanted {} bytes, {} left", n, input.len()),
        ));
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

/// Read an `i32` native-endian length prefix (`-1` = null).
pub fn take_len_prefix(input: &mut &[u8]) -> Result<i32> {
    let raw = take_bytes(input, 4)?;
    Ok(i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
