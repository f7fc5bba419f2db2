use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;
use crate::core::error::Result;

/// Directory holding private swap files
#[derive(Debug)]
pub struct SwapLayout {
    pub swap_dir: PathBuf,
    // Keeps a private directory alive; removed with the layout
    _temp: Option<TempDir>,
}

impl SwapLayout {
    pub fn new(swap_dir: Option<PathBuf>) -> Result<Self> {
        match swap_dir {
            Some(dir) => {
                fs::create_dir_all(&dir)?;
                Ok(SwapLayout { swap_dir: dir, _temp: None })
            }
            None => {
                let temp = tempfile::Builder::new().prefix("fragstore-").tempdir()?;
                Ok(SwapLayout {
                    swap_dir: temp.path().to_path_buf(),
                    _temp: Some(temp),
                })
            }
        }
    }

    pub fn fragment_path(&self, id: &Uuid) -> PathBuf {
        self.swap_dir.join(format!("frag-{}.swap", id))
    }

    pub fn blob_path(&self, id: &Uuid) -> PathBuf {
        self.swap_dir.join(format!("blob-{}.dat", id))
    }

    /// Name of a fragment file inside an exported snapshot directory
    pub fn snapshot_fragment_name(index: usize) -> String {
        format!("fragment_{:06}.swap", index)
    }

    pub fn snapshot_manifest_path(dir: &Path) -> PathBuf {
        dir.join("manifest.json")
    }
}
