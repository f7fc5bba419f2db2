//! Fragment swap file layout:
//!
//! ```text
//! [ column 0 payload ][ column 1 payload ] ... [ column n-1 payload ]
//! [ dir 0 ][ dir 1 ] ... [ dir n-1 ]          <- fixed 16 bytes each
//! ```
//!
//! A directory record is `{offset: u64, length: u32, row_count: u32}`,
//! little-endian. Columns that were not written keep a zero-length record so
//! the directory stays addressable by column index. The column count is not
//! stored; the reader supplies it.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use crc32fast::Hasher;
use crate::core::error::{Error, ErrorKind, Result};

pub const DIRECTORY_RECORD_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectoryEntry {
    pub offset: u64,
    pub length: u32,
    pub row_count: u32,
}

impl DirectoryEntry {
    pub fn placeholder(row_count: u32) -> Self {
        DirectoryEntry { offset: 0, length: 0, row_count }
    }

    pub fn is_placeholder(&self) -> bool {
        self.length == 0
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.row_count.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut offset = [0u8; 8];
        let mut length = [0u8; 4];
        let mut rows = [0u8; 4];
        offset.copy_from_slice(&bytes[0..8]);
        length.copy_from_slice(&bytes[8..12]);
        rows.copy_from_slice(&bytes[12..16]);
        DirectoryEntry {
            offset: u64::from_le_bytes(offset),
            length: u32::from_le_bytes(length),
            row_count: u32::from_le_bytes(rows),
        }
    }
}

/// Result of a completed swap file write
#[derive(Debug, Clone)]
pub struct SwapFileInfo {
    pub path: PathBuf,
    pub entries: Vec<DirectoryEntry>,
    pub size: u64,
    pub checksum: u32,
}

/// Writes payloads to a temporary sibling and renames it into place on
/// `finish`, so a failed swap never leaves a partial file at `path`.
pub struct SwapFileWriter {
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    path: PathBuf,
    position: u64,
    entries: Vec<DirectoryEntry>,
    hasher: Hasher,
    finished: bool,
}

impl SwapFileWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        let file = File::create(&tmp_path)?;

        Ok(SwapFileWriter {
            writer: BufWriter::with_capacity(1024 * 1024, file),
            tmp_path,
            path: path.to_path_buf(),
            position: 0,
            entries: Vec::new(),
            hasher: Hasher::new(),
            finished: false,
        })
    }

    pub fn append_payload(&mut self, payload: &[u8], row_count: u32) -> Result<DirectoryEntry> {
        let length = u32::try_from(payload.len()).map_err(|_| {
            Error::new(
                ErrorKind::CapacityExceeded,
                format!("column payload of {} bytes exceeds u32", payload.len()),
            )
        })?;
        self.writer.write_all(payload)?;
        self.hasher.update(payload);

        let entry = DirectoryEntry { offset: self.position, length, row_count };
        self.position += payload.len() as u64;
        self.entries.push(entry);
        Ok(entry)
    }

    pub fn append_placeholder(&mut self, row_count: u32) -> DirectoryEntry {
        let entry = DirectoryEntry::placeholder(row_count);
        self.entries.push(entry);
        entry
    }

    pub fn finish(mut self) -> Result<SwapFileInfo> {
        let mut directory = Vec::with_capacity(self.entries.len() * DIRECTORY_RECORD_SIZE);
        for entry in &self.entries {
            entry.encode_into(&mut directory);
        }
        self.writer.write_all(&directory)?;
        self.hasher.update(&directory);
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        fs::rename(&self.tmp_path, &self.path)?;
        self.finished = true;

        Ok(SwapFileInfo {
            path: self.path.clone(),
            entries: std::mem::take(&mut self.entries),
            size: self.position + directory.len() as u64,
            checksum: self.hasher.clone().finalize(),
        })
    }
}

impl Drop for SwapFileWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Read and validate the trailing directory of a swap file.
pub fn read_directory(path: &Path, columns: usize) -> Result<Vec<DirectoryEntry>> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let dir_len = (columns * DIRECTORY_RECORD_SIZE) as u64;
    if file_len < dir_len {
        return Err(Error::new(
            ErrorKind::Parse,
            format!(
                "{}: {} bytes is too short for a {}-column directory",
                path.display(),
                file_len,
                columns
            ),
        ));
    }

    let payload_end = file_len - dir_len;
    file.seek(SeekFrom::Start(payload_end))?;
    let mut raw = vec![0u8; dir_len as usize];
    file.read_exact(&mut raw)?;

    let entries: Vec<DirectoryEntry> = raw
        .chunks_exact(DIRECTORY_RECORD_SIZE)
        .map(DirectoryEntry::decode)
        .collect();

    for (column, entry) in entries.iter().enumerate() {
        if entry.offset + entry.length as u64 > payload_end {
            return Err(Error::new(
                ErrorKind::Parse,
                format!(
                    "{}: column {} extent {}+{} overlaps directory at {}",
                    path.display(),
                    column,
                    entry.offset,
                    entry.length,
                    payload_end
                ),
            ));
        }
    }
    Ok(entries)
}

/// CRC32 of a whole file, as recorded in snapshot manifests
pub fn file_checksum(path: &Path) -> Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
