use std::path::PathBuf;

use mmf_os::OsError;

use crate::FileMode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The identity of the file could not be derived.
    #[error("cannot stat '{}': {source}", .path.display())]
    Stat { path: PathBuf, source: OsError },

    #[error("cannot open '{}': {source}", .path.display())]
    Open { path: PathBuf, source: OsError },

    #[error("cannot map '{}': {source}", .path.display())]
    Map { path: PathBuf, source: OsError },

    /// A checked access or a remap past the end of the file.
    #[error("offset {offset} is out of range for {size} bytes")]
    OutOfRange { offset: u64, size: u64 },

    #[error("view offset {offset} is not a multiple of the page size {page_size}")]
    Misaligned { offset: u64, page_size: usize },

    /// The stream has no mapped view.
    #[error("stream is not mapped")]
    InvalidStream,

    #[error("stream opened as {mode:?} can not be read")]
    NotReadable { mode: FileMode },

    /// The file is not open in the pool.
    #[error("'{}' is not open in the pool", .path.display())]
    NotFound { path: PathBuf },

    #[error("memory mapped streams can not be cloned")]
    NotSupported,
}

impl Error {
    /// The OS error behind this error, if any.
    pub fn os_error(&self) -> Option<&OsError> {
        match self {
            Error::Stat { source, .. } | Error::Open { source, .. } | Error::Map { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}
