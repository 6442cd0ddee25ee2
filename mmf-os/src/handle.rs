//! Owned wrappers around raw handles.
use crate::{CacheHint, Os, OsError, OsErrorKind, RawHandle, RawView};

/// An open file. Closed on drop.
pub struct FileHandle {
    raw: Option<RawHandle>,
    os: Os,
}

/// A mapped range of a file. Unmapped on drop.
///
/// The view does not keep its file open; the caller owns both and decides the order of release.
pub struct View {
    raw: Option<RawView>,
    os: Os,
}

// Safety: the view is a plain address range of shared file memory, no thread-local state is
// attached to it. Synchronizing accesses to the bytes is up to the owner.
unsafe impl Send for View {}
unsafe impl Sync for View {}

impl FileHandle {
    pub(crate) fn new(raw: RawHandle, os: Os) -> Self {
        FileHandle { raw: Some(raw), os }
    }

    pub(crate) fn raw(&self) -> RawHandle {
        self.raw.unwrap_or(RawHandle::NONE)
    }

    /// Close the handle, reporting a failure that dropping would ignore.
    pub fn close(mut self) -> Result<(), OsError> {
        match self.raw.take() {
            Some(raw) => (self.os.close)(raw).map_err(|code| OsError::new(OsErrorKind::Close, code)),
            None => Ok(()),
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            let _ = (self.os.close)(raw);
        }
    }
}

impl View {
    pub(crate) fn new(raw: RawView, os: Os) -> Self {
        View { raw: Some(raw), os }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.raw.as_ref().map_or(core::ptr::null(), |raw| raw.addr as *const u8)
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.raw.as_ref().map_or(core::ptr::null_mut(), |raw| raw.addr)
    }

    /// The number of bytes the platform granted.
    pub fn len(&self) -> usize {
        self.raw.as_ref().map_or(0, |raw| raw.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the view back to the file and wait for it.
    pub fn flush(&self, file: &FileHandle) -> Result<(), OsError> {
        let Some(raw) = self.raw.as_ref() else {
            return Ok(());
        };

        (self.os.flush)(raw, file.raw()).map_err(|code| OsError::new(OsErrorKind::Sync, code))
    }

    /// Pass the access hint to the OS. Failures are meaningless to the caller and dropped.
    pub fn advise(&self, hint: CacheHint) {
        if let Some(raw) = self.raw.as_ref() {
            let _ = (self.os.advise)(raw, hint);
        }
    }

    /// Unmap, reporting a failure that dropping would ignore.
    pub fn unmap(mut self) -> Result<(), OsError> {
        match self.raw.take() {
            Some(raw) => (self.os.unmap)(&raw).map_err(|code| OsError::new(OsErrorKind::Unmap, code)),
            None => Ok(()),
        }
    }
}

impl Drop for View {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            let _ = (self.os.unmap)(&raw);
        }
    }
}
