//! I/O utilities for source readers

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::error::{Error, Result};

/// Memory-mapped file for zero-copy record access
#[derive(Debug)]
pub struct MemoryMappedFile {
    /// The memory map
    mmap: Mmap,

    /// The path to the file
    path: PathBuf,
}

impl MemoryMappedFile {
    /// Open a file for memory-mapped reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        // Safety: the map is read-only and readers never truncate source files.
        #[allow(unsafe_code)]
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        Ok(Self { mmap, path })
    }

    /// Get the whole file as bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Get a subslice of the file
    pub fn slice(&self, offset: usize, length: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= self.mmap.len())
            .ok_or_else(|| {
                Error::malformed(
                    self.path.display().to_string(),
                    format!("read of {length} bytes at offset {offset} past end of file"),
                )
            })?;
        Ok(&self.mmap[offset..end])
    }

    /// Get the path to the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the size of the file
    pub fn size(&self) -> usize {
        self.mmap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_are_bounds_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let file = MemoryMappedFile::open(&path).unwrap();
        assert_eq!(file.size(), 4);
        assert_eq!(file.slice(1, 2).unwrap(), &[2, 3]);
        assert!(file.slice(3, 2).is_err());
    }
}
