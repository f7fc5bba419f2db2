use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};
use uuid::Uuid;
use crate::column::slot::SwapExtent;
use crate::column::{Column, Retyped};
use crate::core::context::ColumnEnv;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnKind, ColumnSpec, Value};
use crate::memory::scheduler::Swappable;
use crate::storage::swap_file::{read_directory, SwapFileInfo, SwapFileWriter};

struct FragmentColumn {
    spec: ColumnSpec,
    column: Column,
}

/// A swap file backing this fragment's columns
#[derive(Debug, Clone)]
pub struct SwapFile {
    pub path: Arc<PathBuf>,
    /// Owned by a snapshot; never deleted by this fragment
    pub shared: bool,
}

/// Fixed-capacity block of columns; the unit of swap-out and swap-in.
pub struct Fragment {
    id: Uuid,
    index: usize,
    env: ColumnEnv,
    columns: RwLock<Vec<FragmentColumn>>,
    /// Held for the whole of a swap or dispose
    swap_files: Mutex<Vec<SwapFile>>,
    rows: AtomicUsize,
    completed: AtomicBool,
    /// False between a swap and the next read
    valid: AtomicBool,
    disposed: AtomicBool,
    last_access: AtomicU64,
}

impl Fragment {
    pub fn new(index: usize, specs: &[ColumnSpec], env: ColumnEnv) -> Arc<Self> {
        let columns = specs
            .iter()
            .map(|spec| FragmentColumn {
                spec: spec.clone(),
                column: Column::new(spec, env.clone()),
            })
            .collect();

        let fragment = Arc::new(Fragment {
            id: Uuid::new_v4(),
            index,
            last_access: AtomicU64::new(env.ctx.now_millis()),
            env,
            columns: RwLock::new(columns),
            swap_files: Mutex::new(Vec::new()),
            rows: AtomicUsize::new(0),
            completed: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
        });

        if let Some(scheduler) = &fragment.env.ctx.scheduler {
            scheduler.register(&fragment);
        }
        fragment
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn rows(&self) -> usize {
        self.rows.load(Ordering::Acquire)
    }

    pub fn col_count(&self) -> usize {
        self.columns.read().len()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn specs(&self) -> Vec<ColumnSpec> {
        self.columns.read().iter().map(|c| c.spec.clone()).collect()
    }

    pub fn has_swap_file(&self) -> bool {
        !self.swap_files.lock().is_empty()
    }

    pub fn swap_files(&self) -> Vec<SwapFile> {
        self.swap_files.lock().clone()
    }

    fn check_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed(&format!("fragment {}", self.index)));
        }
        Ok(())
    }

    fn column_out_of_bounds(&self, col: usize, count: usize) -> Error {
        Error::new(
            ErrorKind::OutOfBounds,
            format!("column {} out of bounds: fragment {} has {} columns", col, self.index, count),
        )
    }

    /// Append one value. Returns the new spec when the column was replaced
    /// by a more specific type.
    pub fn add_value(&self, col: usize, value: &Value) -> Result<Option<ColumnSpec>> {
        self.check_live()?;
        if self.is_completed() {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("fragment {} is sealed", self.index),
            ));
        }

        let retyped = {
            let columns = self.columns.read();
            let entry = columns
                .get(col)
                .ok_or_else(|| self.column_out_of_bounds(col, columns.len()))?;
            entry.column.add(&entry.spec, value)?
        };

        match retyped {
            None => Ok(None),
            Some(Retyped { spec, column }) => {
                debug!(fragment = self.index, col, kind = ?spec.kind, "column retyped");
                let mut columns = self.columns.write();
                columns[col] = FragmentColumn { spec: spec.clone(), column };
                Ok(Some(spec))
            }
        }
    }

    /// Append a full row. Returns `(column, new spec)` for every column
    /// that was retyped along the way.
    pub fn add_row(&self, values: &[Value]) -> Result<Vec<(usize, ColumnSpec)>> {
        let mut retyped = Vec::new();
        for (col, value) in values.iter().enumerate() {
            if let Some(spec) = self.add_value(col, value)? {
                retyped.push((col, spec));
            }
        }
        self.rows.fetch_add(1, Ordering::AcqRel);
        Ok(retyped)
    }

    /// Seal the fragment. Idempotent; no-op once disposed.
    pub fn complete(&self) {
        if self.is_disposed() || self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.columns.read().iter() {
            entry.column.complete();
        }
        debug!(fragment = self.index, rows = self.rows(), "fragment sealed");
    }

    /// Called on every read
    pub fn touch(&self) {
        self.last_access.store(self.env.ctx.now_millis(), Ordering::Relaxed);
        self.valid.store(true, Ordering::Release);
    }

    pub fn with_column<R>(&self, col: usize, f: impl FnOnce(&Column) -> Result<R>) -> Result<R> {
        self.check_live()?;
        let columns = self.columns.read();
        let entry = columns
            .get(col)
            .ok_or_else(|| self.column_out_of_bounds(col, columns.len()))?;
        f(&entry.column)
    }

    pub fn get_value(&self, row: usize, col: usize) -> Result<Value> {
        self.with_column(col, |column| column.get_value(row))
    }

    pub fn column_kind(&self, col: usize) -> Result<ColumnKind> {
        self.with_column(col, |column| Ok(column.kind()))
    }

    /// Swap out every serializable column. Unless `force`d, only happens
    /// when the fragment currently has a positive swap priority.
    pub fn swap(&self, force: bool) -> bool {
        let mut files = self.swap_files.lock();
        if self.is_disposed() || !self.is_completed() {
            return false;
        }
        if !force && self.swap_priority() <= 0.0 {
            return false;
        }
        self.valid.store(false, Ordering::Release);

        let columns = self.columns.read();
        if !files.is_empty() {
            // The directory on disk is trusted; only buffers are dropped
            let freed = columns.iter().filter(|c| c.column.evict(None)).count();
            debug!(fragment = self.index, freed, "fragment evicted against existing swap file");
            return freed > 0;
        }

        let path = self.env.ctx.layout.fragment_path(&self.id);
        match write_columns(&columns, &path) {
            Ok(info) => {
                let shared_path = Arc::new(info.path.clone());
                for (entry, dir) in columns.iter().zip(&info.entries) {
                    let extent = (!dir.is_placeholder()).then(|| SwapExtent {
                        path: Arc::clone(&shared_path),
                        offset: dir.offset,
                        length: dir.length,
                    });
                    entry.column.evict(extent);
                }
                files.push(SwapFile { path: shared_path, shared: false });
                debug!(
                    fragment = self.index,
                    path = %info.path.display(),
                    bytes = info.size,
                    "fragment swapped"
                );
                true
            }
            Err(err) => {
                warn!(fragment = self.index, error = %err, "fragment swap aborted");
                self.valid.store(true, Ordering::Release);
                false
            }
        }
    }

    /// Write every column to `path` without evicting anything (snapshot export).
    pub fn write_swap_file(&self, path: &Path) -> Result<SwapFileInfo> {
        let _files = self.swap_files.lock();
        self.check_live()?;
        if !self.is_completed() {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("fragment {} is still open", self.index),
            ));
        }
        let columns = self.columns.read();
        if let Some(col) = columns.iter().position(|c| c.column.kind() == ColumnKind::Blob) {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("column {} of fragment {} is a blob column", col, self.index),
            ));
        }
        write_columns(&columns, path)
    }

    /// Attach to a swap file written earlier (possibly by another process).
    /// Failure to read it does not raise: each column records a diagnostic
    /// and reports missing data when read.
    pub fn bind_to_existing_swap_file(&self, path: &Path, rows: usize, shared: bool) -> bool {
        let mut files = self.swap_files.lock();
        if self.is_disposed() {
            return false;
        }
        let columns = self.columns.read();
        let shared_path = Arc::new(path.to_path_buf());
        let bound = match read_directory(path, columns.len()) {
            Ok(entries) => {
                for (col, (entry, dir)) in columns.iter().zip(&entries).enumerate() {
                    if !dir.is_placeholder() {
                        let extent = SwapExtent {
                            path: Arc::clone(&shared_path),
                            offset: dir.offset,
                            length: dir.length,
                        };
                        entry.column.bind(extent, dir.row_count as usize);
                    } else if dir.row_count > 0 {
                        entry.column.mark_missing(
                            format!("column {} was not written to {}", col, path.display()),
                            dir.row_count as usize,
                        );
                    }
                }
                true
            }
            Err(err) => {
                let diagnostic = format!("swap file {} unreadable: {}", path.display(), err);
                error!(fragment = self.index, path = %path.display(), error = %err, "cannot bind swap file");
                for entry in columns.iter() {
                    entry.column.mark_missing(diagnostic.clone(), rows);
                }
                false
            }
        };

        self.rows.store(rows, Ordering::Release);
        self.completed.store(true, Ordering::Release);
        self.valid.store(false, Ordering::Release);
        files.push(SwapFile { path: shared_path, shared });
        bound
    }

    /// Every column reports `diagnostic` instead of loading.
    pub fn mark_missing(&self, diagnostic: &str) {
        let rows = self.rows();
        for entry in self.columns.read().iter() {
            entry.column.mark_missing(diagnostic.to_string(), rows);
        }
    }

    /// First missing-data diagnostic among the columns
    pub fn missing(&self) -> Option<String> {
        self.columns.read().iter().find_map(|c| c.column.missing())
    }

    /// Any non-empty column currently holding its buffer in memory
    pub fn is_resident(&self) -> bool {
        self.columns
            .read()
            .iter()
            .any(|c| !c.column.is_empty() && c.column.is_resident())
    }

    pub fn heap_size(&self) -> usize {
        self.columns.read().iter().map(|c| c.column.heap_size()).sum()
    }
}

fn write_columns(columns: &[FragmentColumn], path: &Path) -> Result<SwapFileInfo> {
    let mut writer = SwapFileWriter::create(path)?;
    for entry in columns {
        let rows = entry.column.len() as u32;
        match entry.column.payload()? {
            Some(bytes) => {
                writer.append_payload(&bytes, rows)?;
            }
            None => {
                writer.append_placeholder(rows);
            }
        }
    }
    writer.finish()
}

impl Swappable for Fragment {
    fn is_swappable(&self) -> bool {
        !self.is_disposed() && self.columns.read().iter().any(|c| c.column.is_serializable())
    }

    fn swap_priority(&self) -> f64 {
        if self.is_disposed() || !self.is_completed() || !self.is_valid() || !self.is_swappable() {
            return 0.0;
        }
        let idle = self.env.ctx.idle_since(self.last_access.load(Ordering::Relaxed));
        self.env.ctx.priority.priority(idle)
    }

    fn swap(&self) -> bool {
        Fragment::swap(self, false)
    }

    /// Terminal. Private swap files are deleted; shared ones are left alone.
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut files = self.swap_files.lock();
        for entry in self.columns.read().iter() {
            entry.column.dispose();
        }
        for file in files.drain(..) {
            if !file.shared {
                if let Err(err) = fs::remove_file(file.path.as_path()) {
                    warn!(path = %file.path.display(), error = %err, "cannot remove swap file");
                }
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::codec::FormatVersion;
    use crate::core::config::StoreConfig;
    use crate::core::context::StoreContext;

    fn env() -> ColumnEnv {
        let ctx = StoreContext::new(StoreConfig::default()).unwrap().shared();
        ColumnEnv::new(ctx, FormatVersion::V2)
    }

    fn mixed_specs() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new(ColumnKind::Int),
            ColumnSpec::new(ColumnKind::Double),
            ColumnSpec::new(ColumnKind::String),
            ColumnSpec::new(ColumnKind::Boolean),
            ColumnSpec::new(ColumnKind::Timestamp),
            ColumnSpec::new(ColumnKind::Object),
        ]
    }

    fn mixed_row(i: usize) -> Vec<Value> {
        if i % 7 == 0 {
            return vec![Value::Null; 6];
        }
        vec![
            Value::Int(i as i32 - 5000),
            Value::Double(i as f64 * 0.25),
            Value::string(format!("row-{}", i % 50)),
            Value::Bool(i % 2 == 0),
            Value::timestamp_millis(1_600_000_000_000 + i as i64),
            if i % 3 == 0 { Value::Long(i as i64) } else { Value::string("obj") },
        ]
    }

    fn snapshot(fragment: &Fragment) -> Vec<Vec<Value>> {
        (0..fragment.rows())
            .map(|row| (0..6).map(|col| fragment.get_value(row, col).unwrap()).collect())
            .collect()
    }

    #[test]
    fn swap_and_reload_are_idempotent() {
        let specs = mixed_specs();
        let fragment = Fragment::new(0, &specs, env());
        for i in 0..8192 {
            fragment.add_row(&mixed_row(i)).unwrap();
        }
        fragment.complete();
        let baseline = snapshot(&fragment);

        for _ in 0..3 {
            assert!(fragment.swap(true));
            assert!(!fragment.is_resident());
            fragment.touch();
            assert_eq!(snapshot(&fragment), baseline);
        }
        assert_eq!(fragment.swap_files().len(), 1);
    }

    #[test]
    fn open_fragment_is_not_swapped() {
        let fragment = Fragment::new(0, &mixed_specs(), env());
        fragment.add_row(&mixed_row(1)).unwrap();
        assert_eq!(fragment.swap_priority(), 0.0);
        assert!(!fragment.swap(true));
        assert!(fragment.is_resident());
    }

    #[test]
    fn sealed_fragment_rejects_values() {
        let fragment = Fragment::new(0, &mixed_specs(), env());
        fragment.complete();
        let err = fragment.add_value(0, &Value::Int(1)).unwrap_err();
        assert!(err.is(ErrorKind::InvalidState));
    }

    #[test]
    fn non_serializable_column_gets_placeholder() {
        let specs = vec![ColumnSpec::new(ColumnKind::Int), ColumnSpec::new(ColumnKind::Object)];
        let fragment = Fragment::new(0, &specs, env());
        for i in 0..10 {
            fragment.add_row(&[Value::Int(i), Value::opaque(i)]).unwrap();
        }
        fragment.complete();
        assert!(fragment.swap(true));

        let files = fragment.swap_files();
        let entries = read_directory(&files[0].path, 2).unwrap();
        assert!(!entries[0].is_placeholder());
        assert!(entries[1].is_placeholder());
        assert_eq!(entries[1].row_count, 10);

        // The opaque column never left memory
        assert_eq!(fragment.get_value(3, 1).unwrap().as_opaque::<i32>(), Some(&3));
        assert_eq!(fragment.get_value(3, 0).unwrap(), Value::Int(3));
    }

    #[test]
    fn dynamic_column_reports_new_spec() {
        let specs = vec![ColumnSpec::dynamic_object()];
        let fragment = Fragment::new(0, &specs, env());
        assert!(fragment.add_row(&[Value::Null]).unwrap().is_empty());
        let retyped = fragment.add_row(&[Value::Double(1.5)]).unwrap();
        assert_eq!(retyped.len(), 1);
        assert_eq!(retyped[0].1.kind, ColumnKind::Double);
        assert_eq!(fragment.column_kind(0).unwrap(), ColumnKind::Double);
        assert_eq!(fragment.get_value(0, 0).unwrap(), Value::Null);
        assert_eq!(fragment.get_value(1, 0).unwrap(), Value::Double(1.5));
    }

    #[test]
    fn bind_reads_existing_file_and_leaves_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bound.swap");
        let specs = mixed_specs();

        let source = Fragment::new(0, &specs, env());
        for i in 0..100 {
            source.add_row(&mixed_row(i)).unwrap();
        }
        source.complete();
        source.write_swap_file(&path).unwrap();
        let expected = snapshot(&source);

        let bound = Fragment::new(0, &specs, env());
        assert!(bound.bind_to_existing_swap_file(&path, 100, true));
        assert_eq!(bound.rows(), 100);
        assert_eq!(snapshot(&bound), expected);

        bound.dispose();
        assert!(path.exists());
        assert!(bound.get_value(0, 0).unwrap_err().is(ErrorKind::Disposed));
    }

    #[test]
    fn bind_to_missing_file_marks_columns() {
        let dir = tempfile::tempdir().unwrap();
        let fragment = Fragment::new(0, &mixed_specs(), env());
        assert!(!fragment.bind_to_existing_swap_file(&dir.path().join("gone.swap"), 5, true));
        let err = fragment.get_value(0, 2).unwrap_err();
        assert!(err.is(ErrorKind::DataMissing));
        assert!(fragment.missing().unwrap().contains("gone.swap"));
    }

    #[test]
    fn dispose_removes_private_file() {
        let fragment = Fragment::new(0, &mixed_specs(), env());
        for i in 0..20 {
            fragment.add_row(&mixed_row(i)).unwrap();
        }
        fragment.complete();
        assert!(fragment.swap(true));
        let path = fragment.swap_files()[0].path.clone();
        assert!(path.exists());

        fragment.dispose();
        assert!(!path.exists());
        assert!(!fragment.swap(true));
        assert_eq!(fragment.swap_priority(), 0.0);
    }
}
