use std::path::Path;
use std::sync::Arc;

use crate::{CacheHint, FileHandle, OsError, OsErrorKind, RawHandle, View};

/// Interact with the `stat`, `open`, `mmap` and related calls of the platform.
#[derive(Clone)]
pub struct Os {
    inner: Arc<OsInner>,
}

struct OsInner {
    vtable: OsVTable,
}

/// The fields of a `stat` call we care about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileStat {
    /// `st_dev`, or the volume serial number on Windows.
    pub device: u64,
    /// `st_ino`, or the 64-bit file index on Windows.
    pub serial: u64,
    /// Size of the file on disk, in bytes.
    pub size: u64,
}

/// How a file is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    /// Create the file if it does not exist.
    pub create: bool,
    /// Windows applies the access hint when opening, POSIX ignores it here.
    pub hint: CacheHint,
}

/// Memory protection of a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protection {
    Read,
    Write,
    ReadWrite,
}

impl Protection {
    pub fn readable(self) -> bool {
        matches!(self, Protection::Read | Protection::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Protection::Write | Protection::ReadWrite)
    }
}

/// A request for one view into a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapRequest {
    /// File offset of the first mapped byte. Must be a multiple of the page size.
    pub offset: u64,
    /// Number of bytes requested.
    ///
    /// Writable views grow the file to cover `offset + len`. Read-only views are clamped to the
    /// data present in the file.
    pub len: usize,
    pub protection: Protection,
    pub hint: CacheHint,
}

/// A view as returned by the platform.
#[derive(Debug)]
pub struct RawView {
    pub addr: *mut u8,
    /// Number of bytes actually granted, starting at `addr`.
    pub len: usize,
    /// The mapping object backing the view, [`RawHandle::NONE`] where the platform has none.
    pub section: RawHandle,
}

/// A table of OS functions.
///
/// This enumerates the functions required to map files. A vtable must contain functions that
/// behave according to the platform's specification of the correspondingly named calls, see the
/// Safety precondition of [`Os::new_unchecked`]. A native table is selected at build time by
/// [`OsVTable::native`].
///
/// Errors are raw OS codes, the [`Os`] wrapper tags them with the failing operation.
#[non_exhaustive]
pub struct OsVTable {
    pub stat: fn(&Path) -> Result<FileStat, i32>,
    pub open: fn(&Path, &OpenFlags) -> Result<RawHandle, i32>,
    pub fstat: fn(RawHandle) -> Result<FileStat, i32>,
    pub map: fn(RawHandle, &MapRequest) -> Result<RawView, i32>,
    pub unmap: fn(&RawView) -> Result<(), i32>,
    /// Write back a view, the file handle is passed for platforms that need a second flush.
    pub flush: fn(&RawView, RawHandle) -> Result<(), i32>,
    pub advise: fn(&RawView, CacheHint) -> Result<(), i32>,
    pub close: fn(RawHandle) -> Result<(), i32>,
    pub page_size: fn() -> usize,
}

impl OsVTable {
    /// The table of the platform we were built for.
    #[cfg(unix)]
    pub fn native() -> Self {
        crate::posix::vtable()
    }

    /// The table of the platform we were built for.
    #[cfg(windows)]
    pub fn native() -> Self {
        crate::windows::vtable()
    }
}

impl Os {
    /// Create an `Os` from a customized vtable.
    ///
    /// # Safety
    ///
    /// The VTable must contain functions that implement the platform interfaces. In particular a
    /// successful `map` must return an address valid for `len` bytes until passed to `unmap`.
    pub unsafe fn new_unchecked(vtable: OsVTable) -> Self {
        Os {
            inner: Arc::new(OsInner { vtable }),
        }
    }

    #[cfg(any(unix, windows))]
    pub fn new() -> Self {
        unsafe { Self::new_unchecked(OsVTable::native()) }
    }

    pub fn stat(&self, path: &Path) -> Result<FileStat, OsError> {
        (self.inner.vtable.stat)(path).map_err(|code| OsError::new(OsErrorKind::Stat, code))
    }

    pub fn open(&self, path: &Path, flags: &OpenFlags) -> Result<FileHandle, OsError> {
        let raw = (self.inner.vtable.open)(path, flags)
            .map_err(|code| OsError::new(OsErrorKind::Open, code))?;
        Ok(FileHandle::new(raw, self.clone()))
    }

    pub fn fstat(&self, file: &FileHandle) -> Result<FileStat, OsError> {
        (self.inner.vtable.fstat)(file.raw()).map_err(|code| OsError::new(OsErrorKind::Stat, code))
    }

    /// The current on-disk size of an open file.
    pub fn file_size(&self, file: &FileHandle) -> Result<u64, OsError> {
        self.fstat(file).map(|stat| stat.size)
    }

    pub fn map(&self, file: &FileHandle, request: &MapRequest) -> Result<View, OsError> {
        let raw = (self.inner.vtable.map)(file.raw(), request)
            .map_err(|code| OsError::new(OsErrorKind::Map, code))?;
        Ok(View::new(raw, self.clone()))
    }

    /// The granularity which view offsets must be a multiple of.
    pub fn page_size(&self) -> usize {
        (self.inner.vtable.page_size)()
    }
}

#[cfg(any(unix, windows))]
impl Default for Os {
    fn default() -> Self {
        Os::new()
    }
}

impl core::ops::Deref for Os {
    type Target = OsVTable;

    fn deref(&self) -> &Self::Target {
        &self.inner.vtable
    }
}
