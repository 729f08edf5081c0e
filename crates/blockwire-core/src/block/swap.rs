//! Anonymous swap file backing evicted byte blocks.
//!
//! The file is unlinked at creation, so it disappears with the process.
//! Space is handed out in extents: first fit from the free list, else
//! appended at the end of the file. Released extents are merged with
//! their neighbours.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};

/// A byte range in the swap file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SwapExtent {
    pub(crate) offset: u64,
    pub(crate) len: usize,
}

#[derive(Debug, Default)]
struct ExtentMap {
    /// Free ranges sorted by offset, never adjacent
    free: Vec<SwapExtent>,
    /// Current end of the file
    end: u64,
    in_use: u64,
}

impl ExtentMap {
    fn reserve(&mut self, len: usize) -> SwapExtent {
        self.in_use += len as u64;
        if let Some(pos) = self.free.iter().position(|e| e.len >= len) {
            let hole = self.free[pos];
            if hole.len == len {
                self.free.remove(pos);
            } else {
                self.free[pos] = SwapExtent {
                    offset: hole.offset + len as u64,
                    len: hole.len - len,
                };
            }
            return SwapExtent {
                offset: hole.offset,
                len,
            };
        }
        let ext = SwapExtent {
            offset: self.end,
            len,
        };
        self.end += len as u64;
        ext
    }

    fn release(&mut self, ext: SwapExtent) {
        self.in_use -= ext.len as u64;
        let pos = self.free.partition_point(|e| e.offset < ext.offset);
        self.free.insert(pos, ext);

        // merge with successor, then predecessor
        if pos + 1 < self.free.len() {
            let next = self.free[pos + 1];
            if self.free[pos].offset + self.free[pos].len as u64 == next.offset {
                self.free[pos].len += next.len;
                self.free.remove(pos + 1);
            }
        }
        if pos > 0 {
            let prev = self.free[pos - 1];
            if prev.offset + prev.len as u64 == self.free[pos].offset {
                self.free[pos - 1].len += self.free[pos].len;
                self.free.remove(pos);
            }
        }

        // a trailing hole shrinks the logical end
        if let Some(last) = self.free.last().copied() {
            if last.offset + last.len as u64 == self.end {
                self.end = last.offset;
                self.free.pop();
            }
        }
    }
}

pub(crate) struct SwapFile {
    file: File,
    extents: Mutex<ExtentMap>,
}

impl SwapFile {
    /// Create an unlinked temporary file in `dir`, or the system temp dir
    pub(crate) fn create(dir: Option<&Path>) -> Result<Self> {
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
        .map_err(|source| Error::Swap {
            op: "create",
            source,
        })?;
        debug!(dir = ?dir, "swap file created");
        Ok(Self {
            file,
            extents: Mutex::new(ExtentMap::default()),
        })
    }

    /// Wrap an already open file
    #[cfg(test)]
    pub(crate) fn from_file(file: File) -> Self {
        Self {
            file,
            extents: Mutex::new(ExtentMap::default()),
        }
    }

    /// Write `data` to a newly reserved extent
    pub(crate) fn store(&self, data: &[u8]) -> io::Result<SwapExtent> {
        if data.is_empty() {
            return Ok(SwapExtent { offset: 0, len: 0 });
        }
        let ext = self.lock().reserve(data.len());
        if let Err(e) = self.file.write_all_at(data, ext.offset) {
            self.release(ext);
            return Err(e);
        }
        Ok(ext)
    }

    /// Read the contents of `ext` into `buf` (which must be `ext.len` long)
    pub(crate) fn load(&self, ext: SwapExtent, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), ext.len);
        if ext.len == 0 {
            return Ok(());
        }
        self.file.read_exact_at(buf, ext.offset)
    }

    pub(crate) fn release(&self, ext: SwapExtent) {
        if ext.len > 0 {
            self.lock().release(ext);
        }
    }

    /// Bytes currently held by live extents
    pub(crate) fn bytes_in_use(&self) -> u64 {
        self.lock().in_use
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExtentMap> {
        self.extents.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_appends_then_reuses() {
        let mut map = ExtentMap::default();
        let a = map.reserve(100);
        let b = map.reserve(50);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 100);

        map.release(a);
        let c = map.reserve(40);
        assert_eq!(c.offset, 0);
        let d = map.reserve(60);
        assert_eq!(d.offset, 40);
        assert!(map.free.is_empty());
        assert_eq!(map.in_use, 150);
    }

    #[test]
    fn test_release_coalesces() {
        let mut map = ExtentMap::default();
        let a = map.reserve(10);
        let b = map.reserve(10);
        let c = map.reserve(10);
        let _d = map.reserve(10);

        map.release(a);
        map.release(c);
        assert_eq!(map.free.len(), 2);
        map.release(b);
        assert_eq!(map.free, vec![SwapExtent { offset: 0, len: 30 }]);
    }

    #[test]
    fn test_trailing_release_shrinks_end() {
        let mut map = ExtentMap::default();
        let a = map.reserve(10);
        let b = map.reserve(10);
        map.release(b);
        assert_eq!(map.end, 10);
        map.release(a);
        assert_eq!(map.end, 0);
        assert!(map.free.is_empty());
        assert_eq!(map.in_use, 0);
    }

    #[test]
    fn test_store_load_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let swap = SwapFile::create(Some(dir.path())).unwrap();

        let ext = swap.store(b"spilled bytes").unwrap();
        assert_eq!(swap.bytes_in_use(), 13);

        let mut buf = vec![0u8; ext.len];
        swap.load(ext, &mut buf).unwrap();
        assert_eq!(&buf, b"spilled bytes");

        swap.release(ext);
        assert_eq!(swap.bytes_in_use(), 0);
    }

    #[test]
    fn test_create_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = SwapFile::create(Some(&missing)).err().unwrap();
        assert!(matches!(err, Error::Swap { op: "create", .. }));
    }
}
