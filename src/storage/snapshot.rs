use std::fs;
use std::path::Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::column::codec::{FormatVersion, PortableValue};
use crate::compression::compress::CompressionType;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnId, ColumnSpec};
use crate::storage::layout::SwapLayout;
use crate::storage::swap_file::file_checksum;
use crate::table::metadata::{CellMeta, CellPath};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotColumn {
    pub id: ColumnId,
    pub spec: ColumnSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFragment {
    /// File name relative to the snapshot directory
    pub file: String,
    pub rows: usize,
    /// Column specs this fragment was built with; earlier fragments may
    /// predate a dynamic retype
    pub specs: Vec<ColumnSpec>,
    pub size: u64,
    pub checksum: u32,
}

/// `manifest.json` of an exported table: everything needed to reopen the
/// fragment files read-only in another process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub format_version: FormatVersion,
    pub compression: CompressionType,
    /// Including the header row
    pub row_count: usize,
    pub columns: Vec<SnapshotColumn>,
    pub header: Vec<PortableValue>,
    pub fragments: Vec<SnapshotFragment>,
    pub metadata: Vec<(CellPath, CellMeta)>,
}

impl SnapshotManifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = SwapLayout::snapshot_manifest_path(dir);
        if !path.exists() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("no snapshot manifest at {}", path.display()),
            ));
        }

        let data = fs::read(&path)?;
        let manifest: SnapshotManifest = serde_json::from_slice(&data)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(Error::new(
                ErrorKind::Parse,
                format!("unsupported snapshot manifest version {}", manifest.version),
            ));
        }
        Ok(manifest)
    }

    /// Written to a temporary file and renamed, so a reader never sees half a manifest
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = SwapLayout::snapshot_manifest_path(dir);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Compare a fragment file's CRC32 with the recorded one.
    pub fn verify_fragment(&self, dir: &Path, index: usize) -> Result<()> {
        let entry = self.fragments.get(index).ok_or_else(|| {
            Error::new(
                ErrorKind::OutOfBounds,
                format!("snapshot has {} fragments, asked for {}", self.fragments.len(), index),
            )
        })?;
        let actual = file_checksum(&dir.join(&entry.file))?;
        if actual != entry.checksum {
            return Err(Error::new(
                ErrorKind::DataMissing,
                format!(
                    "{} checksum mismatch: expected {:08x}, found {:08x}",
                    entry.file, entry.checksum, actual
                ),
            ));
        }
        Ok(())
    }
}
