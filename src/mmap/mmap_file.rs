use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use crate::core::error::{Error, ErrorKind, Result};

/// Memory-mapped file for zero-copy reads
pub struct MmapFile {
    pub mmap: Mmap,
    pub len: usize,
}

impl MmapFile {
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let metadata = file.metadata()?;
        let len = metadata.len() as usize;
        if len == 0 {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("cannot map empty file {}", path.as_ref().display()),
            ));
        }

        let mmap = unsafe { MmapOptions::new().len(len).map(&file)? };

        Ok(MmapFile { mmap, len })
    }

    pub fn data(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn slice(&self, offset: u64, length: usize) -> Result<&[u8]> {
        let start = offset as usize;
        let end = start.checked_add(length).filter(|&end| end <= self.len).ok_or_else(|| {
            Error::new(
                ErrorKind::OutOfBounds,
                format!("range {}+{} beyond mapped length {}", offset, length, self.len),
            )
        })?;
        Ok(&self.data()[start..end])
    }
}

/// Read `length` bytes at `offset`, through a mapping or a plain seek+read.
pub fn read_range(path: &Path, offset: u64, length: usize, use_mmap: bool) -> Result<Vec<u8>> {
    if use_mmap {
        let mapped = MmapFile::open_read_only(path)?;
        return Ok(mapped.slice(offset, length)?.to_vec());
    }

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut data = vec![0u8; length];
    file.read_exact(&mut data)?;
    Ok(data)
}
