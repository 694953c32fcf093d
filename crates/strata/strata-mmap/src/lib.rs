//! Thin wrapper over `memmap2` for the packet ring's backing storage.
//!
//! Two backing modes: a real file (`create_rw`/`open_rw`, persisted across
//! restarts) or an anonymous, process-private region (`create_anon`, used
//! when no ring directory is configured). Both return the same handle type
//! so `strata-ring` doesn't need to know which one it got.

use memmap2::{Mmap, MmapMut};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

/// A read-write mapping, either file-backed or anonymous.
pub struct MmapFileMut {
    /// File handle kept alive to maintain the memory map validity. `None` for
    /// anonymous mappings.
    _file: Option<File>,
    mmap: MmapMut,
}

/// A read-only mapping of a file created by [`MmapFileMut`] elsewhere.
pub struct MmapFile {
    _file: File,
    mmap: Mmap,
}

impl MmapFileMut {
    /// Create a new file sized to `size_bytes` and map it read-write.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            _file: Some(file),
            mmap,
        })
    }

    /// Open an existing file and map it read-write, adopting whatever is
    /// already there (used to re-attach to a prior ring on startup).
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            _file: Some(file),
            mmap,
        })
    }

    /// Create an anonymous, process-private region. Used for `--ringdir`
    /// unset (ephemeral ring) and in tests.
    pub fn create_anon(size_bytes: usize) -> io::Result<Self> {
        let mmap = MmapMut::map_anon(size_bytes)?;
        Ok(Self {
            _file: None,
            mmap,
        })
    }

    /// Whether this mapping is backed by a real file (and can therefore be
    /// fsynced and reopened after a restart).
    pub fn is_persisted(&self) -> bool {
        self._file.is_some()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Flush dirty pages to the backing file (fsync-equivalent). No-op for
    /// anonymous mappings.
    pub fn flush(&self) -> io::Result<()> {
        if self._file.is_some() {
            self.mmap.flush()?;
        }
        Ok(())
    }
}

impl MmapFile {
    /// Open an existing file and map it read-only.
    pub fn open_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn mmap_roundtrip_bytes() {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = format!("/tmp/strata_mmap_test_{ts}");
        let size = 4096;

        {
            let mut mm = MmapFileMut::create_rw(&path, size).unwrap();
            unsafe {
                let p = mm.as_mut_ptr();
                *p.add(0) = 0xAB;
                *p.add(1) = 0xCD;
            }
            mm.flush().unwrap();
        }
        {
            let mm = MmapFile::open_ro(&path).unwrap();
            unsafe {
                let p = mm.as_ptr();
                assert_eq!(*p.add(0), 0xAB);
                assert_eq!(*p.add(1), 0xCD);
            }
        }

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn anon_mapping_is_not_persisted() {
        let mm = MmapFileMut::create_anon(4096).unwrap();
        assert!(!mm.is_persisted());
        assert_eq!(mm.len(), 4096);
    }
}
