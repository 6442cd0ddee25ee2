use mmf_os::{CacheHint, OpenFlags, Protection};

/// How a stream accesses its file.
///
/// The declaration order is part of the ordering of [`crate::FileId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileMode {
    /// Read-only, the file must exist.
    Read,
    /// Write-only, created if missing.
    Write,
    /// Read and write, created if missing.
    ReadWrite,
    /// Write-only starting at the end of the existing data, created if missing.
    ///
    /// The initial view covers `max(size, min_size)` bytes from the start of the file, so with
    /// the default options it ends where the data does and nothing can be appended. Pass a
    /// larger [`crate::StreamOptions::min_size`], or [`crate::MappedStream::remap`] a window
    /// reaching past the end.
    Append,
}

impl FileMode {
    pub fn readable(self) -> bool {
        self.protection().readable()
    }

    pub fn writable(self) -> bool {
        self.protection().writable()
    }

    /// Whether opening creates a missing file.
    pub fn creates(self) -> bool {
        !matches!(self, FileMode::Read)
    }

    pub(crate) fn open_flags(self, hint: CacheHint) -> OpenFlags {
        // Both platforms refuse to map a handle that can not be read, even for a write-only view.
        // The protection of the view is what enforces the mode.
        OpenFlags {
            read: true,
            write: self.writable(),
            create: self.creates(),
            hint,
        }
    }

    pub(crate) fn protection(self) -> Protection {
        match self {
            FileMode::Read => Protection::Read,
            FileMode::Write | FileMode::Append => Protection::Write,
            FileMode::ReadWrite => Protection::ReadWrite,
        }
    }
}

#[test]
fn mode_translation() {
    let read = FileMode::Read.open_flags(CacheHint::Normal);
    assert!(read.read && !read.write && !read.create);

    for mode in [FileMode::Write, FileMode::Append, FileMode::ReadWrite] {
        let flags = mode.open_flags(CacheHint::RandomAccess);
        assert!(flags.write && flags.create, "{mode:?}");
        assert_eq!(flags.hint, CacheHint::RandomAccess);
    }

    assert!(!FileMode::Append.readable());
    assert!(FileMode::ReadWrite.readable() && FileMode::ReadWrite.writable());
}
