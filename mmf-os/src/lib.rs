//! Operating system bindings for memory mapping regular files.
//!
//! Everything here is a thin translation of the platform's own calls: `stat`, `open`, `mmap` and
//! friends on POSIX systems, `CreateFileW` and the file-mapping family on Windows. The calls are
//! collected into an [`OsVTable`] that is chosen at build time; the owned wrappers [`FileHandle`]
//! and [`View`] release what they hold when dropped.
//!
//! Nothing in this crate tracks positions, sharing, or reference counts. That is the business of
//! the stream layer built on top.
use core::fmt;

mod handle;
pub mod op;

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

pub use handle::{FileHandle, View};
pub use op::{FileStat, MapRequest, OpenFlags, Os, OsVTable, Protection, RawView};

/// A raw OS handle: a file descriptor on POSIX systems, a `HANDLE` on Windows.
///
/// Only the vtable functions interpret the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawHandle(pub isize);

impl RawHandle {
    /// Marks the absence of a handle, e.g. the mapping object of a POSIX view.
    pub const NONE: RawHandle = RawHandle(-1);
}

/// Access pattern advice passed to the OS for read-ahead tuning.
///
/// Purely advisory. Platforms without an equivalent ignore it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheHint {
    /// Good overall performance.
    #[default]
    Normal,
    /// Read the file once with few seeks.
    SequentialScan,
    /// Jump around.
    RandomAccess,
}

/// The OS call that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OsErrorKind {
    Stat,
    Open,
    Map,
    Unmap,
    Sync,
    Close,
}

/// An error returned by an OS call, with the raw error code of the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OsError {
    kind: OsErrorKind,
    code: i32,
}

impl OsError {
    pub fn new(kind: OsErrorKind, code: i32) -> Self {
        OsError { kind, code }
    }

    pub fn kind(&self) -> OsErrorKind {
        self.kind
    }

    /// The raw `errno` or `GetLastError` value.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Whether the failed call reported a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        self.to_io_error().kind() == std::io::ErrorKind::NotFound
    }

    pub fn to_io_error(&self) -> std::io::Error {
        std::io::Error::from_raw_os_error(self.code)
    }
}

/// Retrieve the error code of the last failed OS call on this thread.
pub(crate) fn last_code() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

impl fmt::Display for OsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OsErrorKind::Stat => "stat",
            OsErrorKind::Open => "open",
            OsErrorKind::Map => "map",
            OsErrorKind::Unmap => "unmap",
            OsErrorKind::Sync => "sync",
            OsErrorKind::Close => "close",
        })
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.kind, self.to_io_error())
    }
}

impl std::error::Error for OsError {}

impl From<OsError> for std::io::Error {
    fn from(err: OsError) -> Self {
        err.to_io_error()
    }
}
