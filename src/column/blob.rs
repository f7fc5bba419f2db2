use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use parking_lot::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;
use crate::core::context::ColumnEnv;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnSpec, Value};
use crate::memory::scheduler::Swappable;

struct BlobState {
    /// `None` once the payload lives only in the private file
    values: Vec<Option<Value>>,
    /// File offset of each row's record, -1 until written
    offsets: Vec<i64>,
    /// Most recently touched rows, oldest first
    working_set: VecDeque<usize>,
    file: Option<File>,
}

impl BlobState {
    fn touch(&mut self, row: usize, limit: usize) {
        if let Some(pos) = self.working_set.iter().position(|&r| r == row) {
            self.working_set.remove(pos);
        }
        self.working_set.push_back(row);
        while self.working_set.len() > limit {
            self.working_set.pop_front();
        }
    }

    fn cold_resident_rows(&self) -> usize {
        self.values
            .iter()
            .enumerate()
            .filter(|(row, v)| {
                matches!(v, Some(value) if !value.is_null()) && !self.working_set.contains(row)
            })
            .count()
    }
}

/// Column for large values (images, binary payloads).
///
/// Only a small working set of recently touched rows is guaranteed to stay in
/// memory; `swap` appends every other row to a private file as a
/// `u32` little-endian length-prefixed record and frees it.
pub struct BlobColumn {
    state: Mutex<BlobState>,
    env: ColumnEnv,
    path: PathBuf,
    len: AtomicUsize,
    capacity: usize,
    serializable: AtomicBool,
    disposed: AtomicBool,
    last_access: AtomicU64,
}

impl BlobColumn {
    pub fn new(spec: &ColumnSpec, env: ColumnEnv) -> Self {
        let path = env.ctx.layout.blob_path(&Uuid::new_v4());
        let now = env.ctx.now_millis();
        BlobColumn {
            state: Mutex::new(BlobState {
                values: Vec::with_capacity(spec.initial_capacity),
                offsets: Vec::with_capacity(spec.initial_capacity),
                working_set: VecDeque::new(),
                file: None,
            }),
            env,
            path,
            len: AtomicUsize::new(0),
            capacity: spec.max_capacity,
            serializable: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            last_access: AtomicU64::new(now),
        }
    }

    fn working_set_size(&self) -> usize {
        self.env.ctx.config.working_set_size
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

    pub fn push(&self, value: &Value) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed("blob column"));
        }
        if !value.is_persistable() {
            self.serializable.store(false, Ordering::Release);
        }

        let mut state = self.state.lock();
        let row = state.values.len();
        if row >= self.capacity {
            return Err(Error::new(
                ErrorKind::CapacityExceeded,
                format!("blob column is full at {} rows", self.capacity),
            ));
        }
        state.values.push(Some(value.clone()));
        state.offsets.push(-1);
        state.touch(row, self.working_set_size());
        self.len.store(row + 1, Ordering::Release);
        Ok(())
    }

    pub fn value(&self, row: usize) -> Result<Value> {
        if self.is_disposed() {
            return Err(Error::disposed("blob column"));
        }
        let len = self.len();
        if row >= len {
            return Err(Error::new(
                ErrorKind::OutOfBounds,
                format!("row {} beyond blob column length {}", row, len),
            ));
        }
        self.last_access.store(self.env.ctx.now_millis(), Ordering::Relaxed);

        {
            let mut state = self.state.lock();
            if let Some(value) = self.resident(&state, row)? {
                state.touch(row, self.working_set_size());
                return Ok(value);
            }
        }

        self.env.ctx.monitor.will_block_on_io();

        let mut state = self.state.lock();
        if let Some(value) = self.resident(&state, row)? {
            return Ok(value);
        }
        let offset = state.offsets[row];
        let value = self.read_record(&mut state, offset).map_err(|err| {
            error!(
                path = %self.path.display(),
                row,
                offset,
                error = %err,
                "failed to reload blob row"
            );
            Error::new(
                ErrorKind::DataMissing,
                format!("blob file {} row {}: {}", self.path.display(), row, err),
            )
        })?;
        state.values[row] = Some(value.clone());
        state.touch(row, self.working_set_size());
        Ok(value)
    }

    /// Row payload if still in memory. Dispose may have emptied the state
    /// since the caller's last check.
    fn resident(&self, state: &BlobState, row: usize) -> Result<Option<Value>> {
        if self.is_disposed() {
            return Err(Error::disposed("blob column"));
        }
        match state.values.get(row) {
            Some(value) => Ok(value.clone()),
            None => Err(Error::disposed("blob column")),
        }
    }

    pub fn is_null(&self, row: usize) -> Result<bool> {
        // Nulls are never written out, so a freed row is never null
        let resident = {
            let state = self.state.lock();
            state.values.get(row).cloned()
        };
        match resident {
            Some(Some(value)) => Ok(value.is_null()),
            Some(None) => Ok(false),
            None => self.value(row).map(|v| v.is_null()),
        }
    }

    fn read_record(&self, state: &mut BlobState, offset: i64) -> Result<Value> {
        if offset < 0 {
            return Err(Error::new(ErrorKind::Internal, "row freed before it was written".to_string()));
        }
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "blob file not open".to_string()))?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let mut raw = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        file.read_exact(&mut raw)?;
        self.env.ctx.codec.decode(&raw, self.env.version)
    }

    fn open_file(&self, state: &mut BlobState) -> Result<()> {
        if state.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)?;
            state.file = Some(file);
        }
        Ok(())
    }

    /// Write cold rows out and free them. Returns how many rows were freed.
    fn swap_cold_rows(&self) -> Result<usize> {
        let mut state = self.state.lock();
        if self.is_disposed() {
            return Ok(0);
        }
        self.open_file(&mut state)?;

        let mut freed = 0;
        for row in 0..state.values.len() {
            if state.working_set.contains(&row) {
                continue;
            }
            let value = match &state.values[row] {
                Some(value) if !value.is_null() => value.clone(),
                _ => continue,
            };
            if state.offsets[row] < 0 {
                let bytes = self.env.ctx.codec.encode(&value, self.env.version)?;
                let len = u32::try_from(bytes.len()).map_err(|_| {
                    Error::new(ErrorKind::CapacityExceeded, format!("blob of {} bytes", bytes.len()))
                })?;
                let file = state
                    .file
                    .as_mut()
                    .ok_or_else(|| Error::new(ErrorKind::Internal, "blob file not open".to_string()))?;
                let offset = file.seek(SeekFrom::End(0))?;
                file.write_all(&len.to_le_bytes())?;
                file.write_all(&bytes)?;
                state.offsets[row] = offset as i64;
            }
            state.values[row] = None;
            freed += 1;
        }
        if let Some(file) = state.file.as_mut() {
            file.flush()?;
        }
        Ok(freed)
    }

    /// Rows whose payload is held in memory; nulls are not counted.
    pub fn resident_rows(&self) -> usize {
        self.state
            .lock()
            .values
            .iter()
            .filter(|v| matches!(v, Some(value) if !value.is_null()))
            .count()
    }
}

impl Swappable for BlobColumn {
    fn is_swappable(&self) -> bool {
        !self.is_disposed() && self.is_serializable()
    }

    fn swap_priority(&self) -> f64 {
        if !self.is_swappable() || self.len() <= self.working_set_size() {
            return 0.0;
        }
        if self.state.lock().cold_resident_rows() == 0 {
            return 0.0;
        }
        let idle = self.env.ctx.idle_since(self.last_access.load(Ordering::Relaxed));
        self.env.ctx.priority.priority(idle)
    }

    fn swap(&self) -> bool {
        if !self.is_swappable() {
            return false;
        }
        match self.swap_cold_rows() {
            Ok(freed) => {
                debug!(path = %self.path.display(), freed, "blob rows swapped");
                freed > 0
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "blob swap aborted");
                false
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        state.values = Vec::new();
        state.offsets = Vec::new();
        state.working_set.clear();
        if state.file.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
