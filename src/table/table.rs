use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use chrono::Utc;
use parking_lot::{Condvar, Mutex, RwLock};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use crate::column::Column;
use crate::column::codec::PortableValue;
use crate::core::context::{ColumnEnv, StoreContext};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{route_row, ColumnId, ColumnKind, ColumnSpec, Value};
use crate::memory::scheduler::Swappable;
use crate::storage::layout::SwapLayout;
use crate::storage::snapshot::{SnapshotColumn, SnapshotFragment, SnapshotManifest, MANIFEST_VERSION};
use crate::table::fragment::Fragment;
use crate::table::metadata::{CellMeta, CellPath, MetadataMap};

struct TableState {
    fragments: Vec<Arc<Fragment>>,
    completed: bool,
    disposed: bool,
}

/// Producer-side bookkeeping; only the appending thread touches it.
struct Producer {
    current: Option<Arc<Fragment>>,
    since_notify: usize,
    notify_every: usize,
    since_backpressure: usize,
    /// A failed append leaves a partial row behind; no further rows are accepted
    failed: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    pub rows: usize,
    pub columns: usize,
    pub fragments: usize,
    pub swapped_fragments: usize,
    pub resident_bytes: usize,
    pub completed: bool,
}

/// Append-only table of fragments.
///
/// Row 0 is the header. Data row `r` lives in fragment `(r - 1) >> 13` at
/// index `(r - 1) & 8191`. One producer appends; any number of readers may
/// read concurrently, and a scheduler may swap sealed fragments out at any
/// time.
pub struct Table {
    ctx: Arc<StoreContext>,
    env: ColumnEnv,
    ids: Vec<ColumnId>,
    /// Specs for fragments created from now on
    specs: RwLock<Vec<ColumnSpec>>,
    header: RwLock<Vec<Value>>,
    state: Mutex<TableState>,
    more_rows: Condvar,
    producer: Mutex<Producer>,
    rows: AtomicUsize,
    labels: Mutex<Option<HashMap<String, usize>>>,
    metadata: RwLock<MetadataMap>,
    missing: Mutex<Option<String>>,
    snapshot_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("columns", &self.ids.len())
            .field("rows", &self.rows.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Table {
    pub fn new(specs: Vec<ColumnSpec>, ctx: Arc<StoreContext>) -> Self {
        let ids = specs.iter().map(|_| ColumnId::new()).collect();
        let env = ColumnEnv::new(Arc::clone(&ctx), ctx.config.format_version);
        Self::with_parts(ctx, env, ids, specs, None)
    }

    fn with_parts(
        ctx: Arc<StoreContext>,
        env: ColumnEnv,
        ids: Vec<ColumnId>,
        specs: Vec<ColumnSpec>,
        snapshot_dir: Option<PathBuf>,
    ) -> Self {
        let notify_every = ctx.config.notify_min_rows.max(1);
        Table {
            ctx,
            env,
            ids,
            specs: RwLock::new(specs),
            header: RwLock::new(Vec::new()),
            state: Mutex::new(TableState {
                fragments: Vec::new(),
                completed: false,
                disposed: false,
            }),
            more_rows: Condvar::new(),
            producer: Mutex::new(Producer {
                current: None,
                since_notify: 0,
                notify_every,
                since_backpressure: 0,
                failed: None,
            }),
            rows: AtomicUsize::new(0),
            labels: Mutex::new(None),
            metadata: RwLock::new(MetadataMap::new()),
            missing: Mutex::new(None),
            snapshot_dir,
        }
    }

    /// Rows appended so far, header included
    pub fn row_count(&self) -> usize {
        self.rows.load(Ordering::Acquire)
    }

    pub fn col_count(&self) -> usize {
        self.ids.len()
    }

    pub fn column_ids(&self) -> &[ColumnId] {
        &self.ids
    }

    pub fn specs(&self) -> Vec<ColumnSpec> {
        self.specs.read().clone()
    }

    pub fn column_kind(&self, col: usize) -> Result<ColumnKind> {
        self.check_column(col)?;
        Ok(self.specs.read()[col].kind)
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn snapshot_dir(&self) -> Option<&Path> {
        self.snapshot_dir.as_deref()
    }

    pub fn fragments(&self) -> Vec<Arc<Fragment>> {
        self.state.lock().fragments.clone()
    }

    fn check_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed("table"));
        }
        Ok(())
    }

    fn check_column(&self, col: usize) -> Result<()> {
        if col >= self.ids.len() {
            return Err(Error::new(
                ErrorKind::OutOfBounds,
                format!("column {} out of bounds: table has {} columns", col, self.ids.len()),
            ));
        }
        Ok(())
    }

    /// Append one row. The first row is the header; missing header cells are
    /// labelled `Column{i}`. Short data rows are padded with nulls.
    pub fn add_row(&self, values: &[Value]) -> Result<()> {
        let mut producer = self.producer.lock();
        if let Some(reason) = &producer.failed {
            return Err(Error::new(ErrorKind::InvalidState, reason.clone()));
        }
        {
            let state = self.state.lock();
            if state.disposed {
                return Err(Error::disposed("table"));
            }
            if state.completed {
                return Err(Error::new(ErrorKind::InvalidState, "table is completed".to_string()));
            }
        }

        let cols = self.ids.len();
        if values.len() > cols {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("row has {} values, table has {} columns", values.len(), cols),
            ));
        }

        let row = self.row_count();
        if row == 0 {
            let header = (0..cols)
                .map(|i| match values.get(i) {
                    Some(v) if !v.is_null() => v.clone(),
                    _ => Value::string(format!("Column{}", i)),
                })
                .collect();
            *self.header.write() = header;
            self.labels.lock().take();
            self.rows.store(1, Ordering::Release);
            return Ok(());
        }

        let (fragment_index, intra) = route_row(row).ok_or_else(|| {
            Error::new(ErrorKind::Internal, format!("row {} has no fragment", row))
        })?;
        if intra == 0 {
            self.start_fragment(&mut producer, fragment_index)?;
        }
        let fragment = producer
            .current
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::Internal, format!("no open fragment for row {}", row)))?;

        let padded;
        let values = if values.len() < cols {
            let mut v = values.to_vec();
            v.resize(cols, Value::Null);
            padded = v;
            &padded[..]
        } else {
            values
        };

        match fragment.add_row(values) {
            Ok(retyped) if !retyped.is_empty() => {
                let mut specs = self.specs.write();
                for (col, spec) in retyped {
                    specs[col] = spec;
                }
            }
            Ok(_) => {}
            Err(err) => {
                producer.failed = Some(format!("append of row {} failed: {}", row, err));
                return Err(err);
            }
        }
        self.rows.store(row + 1, Ordering::Release);

        producer.since_notify += 1;
        if producer.since_notify >= producer.notify_every {
            producer.since_notify = 0;
            producer.notify_every = (producer.notify_every * 2).min(self.ctx.config.notify_max_rows.max(1));
            let _state = self.state.lock();
            self.more_rows.notify_all();
        }

        producer.since_backpressure += 1;
        let backpressure = producer.since_backpressure >= self.ctx.config.backpressure_rows;
        if backpressure {
            producer.since_backpressure = 0;
        }
        drop(producer);

        if backpressure {
            self.ctx.monitor.wait_for_memory();
        }
        Ok(())
    }

    /// Seal the open fragment and start a new one built from the current specs.
    fn start_fragment(&self, producer: &mut Producer, index: usize) -> Result<()> {
        if let Some(previous) = producer.current.take() {
            previous.complete();
        }
        let specs = self.specs.read().clone();
        let fragment = Fragment::new(index, &specs, self.env.clone());

        let mut state = self.state.lock();
        if state.disposed {
            drop(state);
            fragment.dispose();
            return Err(Error::disposed("table"));
        }
        state.fragments.push(Arc::clone(&fragment));
        drop(state);

        debug!(fragment = index, "fragment started");
        producer.current = Some(fragment);
        Ok(())
    }

    /// Block until `row` exists or the table is completed. Returns whether
    /// the row exists.
    pub fn more_rows(&self, row: usize) -> bool {
        self.wait_for_row(row, None)
    }

    /// Like [`Table::more_rows`], giving up after `timeout`.
    pub fn more_rows_timeout(&self, row: usize, timeout: Duration) -> bool {
        self.wait_for_row(row, Some(Instant::now() + timeout))
    }

    fn wait_for_row(&self, row: usize, deadline: Option<Instant>) -> bool {
        if row < self.row_count() {
            return true;
        }
        let poll = self.ctx.config.more_rows_poll;
        let mut state = self.state.lock();
        loop {
            if row < self.row_count() {
                return true;
            }
            if state.completed || state.disposed {
                return row < self.row_count();
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };
            self.more_rows.wait_for(&mut state, slice);
        }
    }

    /// Seal the open fragment and wake every waiting reader. Idempotent.
    pub fn complete(&self) {
        let mut producer = self.producer.lock();
        {
            let state = self.state.lock();
            if state.completed || state.disposed {
                return;
            }
        }
        if let Some(current) = producer.current.take() {
            current.complete();
        }

        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.completed = true;
        self.more_rows.notify_all();
        info!(rows = self.row_count(), fragments = state.fragments.len(), "table completed");
    }

    /// Terminal. Safe to call while other threads are reading: they get
    /// `Disposed` errors from then on.
    pub fn dispose(&self) {
        let fragments = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            self.more_rows.notify_all();
            std::mem::take(&mut state.fragments)
        };
        for fragment in &fragments {
            fragment.dispose();
        }
        self.header.write().clear();
        self.metadata.write().clear();
        self.labels.lock().take();
        debug!(fragments = fragments.len(), "table disposed");
    }

    fn out_of_bounds(&self, row: usize, fragment: usize, completed: bool, swap_file: bool) -> Error {
        Error::new(
            ErrorKind::OutOfBounds,
            format!(
                "row {} (fragment {}) out of bounds: table has {} rows, completed={}, swap file present={}",
                row,
                fragment,
                self.row_count(),
                completed,
                swap_file
            ),
        )
    }

    fn locate(&self, row: usize) -> Result<(Arc<Fragment>, usize)> {
        let rows = self.row_count();
        let (index, intra) = route_row(row)
            .ok_or_else(|| Error::new(ErrorKind::Internal, "header row has no fragment".to_string()))?;

        let (fragment, completed) = {
            let state = self.state.lock();
            if state.disposed {
                return Err(Error::disposed("table"));
            }
            (state.fragments.get(index).cloned(), state.completed)
        };

        match fragment {
            Some(fragment) if row < rows && intra < fragment.rows() => Ok((fragment, intra)),
            Some(fragment) => Err(self.out_of_bounds(row, index, completed, fragment.has_swap_file())),
            None => Err(self.out_of_bounds(row, index, completed, false)),
        }
    }

    /// Shared path for every cell accessor. Missing swap data degrades to
    /// `missing` and a table-level notice instead of an error.
    fn cell<R>(
        &self,
        row: usize,
        col: usize,
        missing: R,
        header: impl FnOnce(&Value) -> R,
        read: impl FnOnce(&Column, usize) -> Result<R>,
    ) -> Result<R> {
        self.check_column(col)?;
        if row == 0 {
            self.check_live()?;
            let cells = self.header.read();
            return match cells.get(col) {
                Some(cell) => Ok(header(cell)),
                // dispose() clears the header after flagging the table
                None if self.is_disposed() => Err(Error::disposed("table")),
                None => Err(Error::new(ErrorKind::OutOfBounds, "header row not written yet".to_string())),
            };
        }

        let (fragment, intra) = self.locate(row)?;
        fragment.touch();
        match fragment.with_column(col, |column| read(column, intra)) {
            Err(err) if err.is(ErrorKind::DataMissing) => {
                self.record_missing(&err);
                Ok(missing)
            }
            other => other,
        }
    }

    fn record_missing(&self, err: &Error) {
        let mut missing = self.missing.lock();
        if missing.is_none() {
            warn!(error = %err, "table data file missing");
            *missing = Some(format!("Data file missing: {}", err.context));
        }
    }

    /// User-facing notice once any read found its swap data missing
    pub fn data_missing_notice(&self) -> Option<String> {
        self.missing.lock().clone()
    }

    pub fn get_value(&self, row: usize, col: usize) -> Result<Value> {
        self.cell(row, col, Value::Null, Value::clone, |c, i| c.get_value(i))
    }

    pub fn get_f64(&self, row: usize, col: usize) -> Result<f64> {
        self.cell(row, col, 0.0, Value::as_f64, |c, i| c.get_f64(i))
    }

    pub fn get_f32(&self, row: usize, col: usize) -> Result<f32> {
        self.cell(row, col, 0.0, |v| v.as_f64() as f32, |c, i| c.get_f32(i))
    }

    pub fn get_i64(&self, row: usize, col: usize) -> Result<i64> {
        self.cell(row, col, 0, Value::as_i64, |c, i| c.get_i64(i))
    }

    pub fn get_i32(&self, row: usize, col: usize) -> Result<i32> {
        self.cell(row, col, 0, |v| v.as_i64() as i32, |c, i| c.get_i32(i))
    }

    pub fn get_i16(&self, row: usize, col: usize) -> Result<i16> {
        self.cell(row, col, 0, |v| v.as_i64() as i16, |c, i| c.get_i16(i))
    }

    pub fn get_i8(&self, row: usize, col: usize) -> Result<i8> {
        self.cell(row, col, 0, |v| v.as_i64() as i8, |c, i| c.get_i8(i))
    }

    pub fn get_bool(&self, row: usize, col: usize) -> Result<bool> {
        self.cell(row, col, false, Value::as_bool, |c, i| c.get_bool(i))
    }

    pub fn is_null(&self, row: usize, col: usize) -> Result<bool> {
        self.cell(row, col, true, Value::is_null, |c, i| c.is_null(i))
    }

    /// Only the header row is mutable.
    pub fn set_value(&self, row: usize, col: usize, value: Value) -> Result<()> {
        if row != 0 {
            return Err(Error::new(
                ErrorKind::UnsupportedMutation,
                format!("row {} is past the header; tables are append-only", row),
            ));
        }
        self.check_column(col)?;
        self.check_live()?;
        let mut header = self.header.write();
        let cell = header.get_mut(col).ok_or_else(|| {
            Error::new(ErrorKind::InvalidState, "header row not written yet".to_string())
        })?;
        *cell = value;
        self.labels.lock().take();
        Ok(())
    }

    pub fn header(&self) -> Vec<Value> {
        self.header.read().clone()
    }

    /// First column whose header reads `label`.
    pub fn find_column_index(&self, label: &str) -> Option<usize> {
        let mut labels = self.labels.lock();
        let map = labels.get_or_insert_with(|| {
            let mut map = HashMap::new();
            for (i, cell) in self.header.read().iter().enumerate() {
                map.entry(cell.to_string()).or_insert(i);
            }
            map
        });
        map.get(label).copied()
    }

    pub fn put_metadata(&self, path: CellPath, meta: CellMeta) -> Result<()> {
        self.check_live()?;
        self.metadata.write().insert(path, meta);
        Ok(())
    }

    pub fn metadata(&self, path: &CellPath) -> Option<CellMeta> {
        self.metadata.read().get(path).cloned()
    }

    pub fn metadata_for_column(&self, column: &str) -> Vec<(CellPath, CellMeta)> {
        self.metadata
            .read()
            .for_column(column)
            .into_iter()
            .map(|(p, m)| (p.clone(), m.clone()))
            .collect()
    }

    /// Swap every sealed fragment in parallel. Returns how many were swapped.
    pub fn swap_all(&self, force: bool) -> usize {
        let fragments = self.fragments();
        let swapped = fragments.par_iter().filter(|f| f.swap(force)).count();
        debug!(swapped, total = fragments.len(), "bulk swap finished");
        swapped
    }

    pub fn stats(&self) -> TableStats {
        let (fragments, completed) = {
            let state = self.state.lock();
            (state.fragments.clone(), state.completed)
        };
        TableStats {
            rows: self.row_count(),
            columns: self.col_count(),
            fragments: fragments.len(),
            swapped_fragments: fragments.iter().filter(|f| f.has_swap_file() && !f.is_resident()).count(),
            resident_bytes: fragments.iter().map(|f| f.heap_size()).sum(),
            completed,
        }
    }

    /// Write every fragment plus `manifest.json` into `dir`. The table must
    /// be completed and hold no blob columns.
    pub fn export_snapshot(&self, dir: &Path) -> Result<SnapshotManifest> {
        let (fragments, completed) = {
            let state = self.state.lock();
            if state.disposed {
                return Err(Error::disposed("table"));
            }
            (state.fragments.clone(), state.completed)
        };
        if !completed {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "only completed tables can be exported".to_string(),
            ));
        }
        fs::create_dir_all(dir)?;

        let mut entries = Vec::with_capacity(fragments.len());
        for (index, fragment) in fragments.iter().enumerate() {
            let file = SwapLayout::snapshot_fragment_name(index);
            let info = fragment.write_swap_file(&dir.join(&file))?;
            entries.push(SnapshotFragment {
                file,
                rows: fragment.rows(),
                specs: fragment.specs(),
                size: info.size,
                checksum: info.checksum,
            });
        }

        let header = self
            .header
            .read()
            .iter()
            .map(PortableValue::try_from)
            .collect::<Result<Vec<_>>>()?;
        let columns = self
            .ids
            .iter()
            .zip(self.specs.read().iter())
            .map(|(id, spec)| SnapshotColumn { id: *id, spec: spec.clone() })
            .collect();

        let manifest = SnapshotManifest {
            version: MANIFEST_VERSION,
            created_at: Utc::now(),
            format_version: self.env.version,
            compression: self.env.compression,
            row_count: self.row_count(),
            columns,
            header,
            fragments: entries,
            metadata: self.metadata.read().to_entries(),
        };
        manifest.save(dir)?;
        info!(dir = %dir.display(), fragments = manifest.fragments.len(), "snapshot exported");
        Ok(manifest)
    }

    /// Reopen an exported snapshot as a completed, read-only table. Its
    /// files are shared: disposing the table leaves them in place.
    pub fn open_snapshot(dir: &Path, ctx: Arc<StoreContext>) -> Result<Table> {
        let manifest = SnapshotManifest::load(dir)?;
        let env = ColumnEnv::new(Arc::clone(&ctx), manifest.format_version)
            .with_compression(manifest.compression);
        let ids = manifest.columns.iter().map(|c| c.id).collect();
        let specs = manifest.columns.iter().map(|c| c.spec.clone()).collect();
        let header = manifest
            .header
            .iter()
            .cloned()
            .map(PortableValue::into_value)
            .collect::<Result<Vec<_>>>()?;

        let verify = ctx.config.verify_snapshot_checksums;
        let table = Table::with_parts(ctx, env, ids, specs, Some(dir.to_path_buf()));

        let mut fragments = Vec::with_capacity(manifest.fragments.len());
        for (index, entry) in manifest.fragments.iter().enumerate() {
            let fragment = Fragment::new(index, &entry.specs, table.env.clone());
            fragment.bind_to_existing_swap_file(&dir.join(&entry.file), entry.rows, true);
            if verify {
                if let Err(err) = manifest.verify_fragment(dir, index) {
                    warn!(fragment = index, error = %err, "snapshot fragment failed verification");
                    fragment.mark_missing(&err.to_string());
                }
            }
            fragments.push(fragment);
        }

        *table.header.write() = header;
        *table.metadata.write() = MetadataMap::from_entries(manifest.metadata);
        table.rows.store(manifest.row_count, Ordering::Release);
        {
            let mut state = table.state.lock();
            state.fragments = fragments;
            state.completed = true;
        }
        info!(dir = %dir.display(), rows = manifest.row_count, "snapshot opened");
        Ok(table)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        self.dispose();
    }
}
