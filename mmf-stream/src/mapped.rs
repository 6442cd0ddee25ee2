//! One file, one view.
use core::sync::atomic::{AtomicUsize, Ordering};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mmf_os::{FileHandle, FileStat, MapRequest, Os, OsError, View};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::stream::{resolve, DataStream};
use crate::{CacheHint, Error, FileId, FileMode, StreamOptions};

/// A stream over a memory mapped file.
///
/// Reads and writes copy between the caller's buffer and a view of the file. The view covers a
/// window `[offset, offset + mapped_size())` of the file which is only ever changed by
/// [`MappedStream::remap`], never grown implicitly.
///
/// Cursor, view and handle are guarded by one lock per stream, so `remap` can not pull the
/// mapping from under a concurrent `read` or `write`.
pub struct MappedStream {
    path: PathBuf,
    mode: FileMode,
    hint: CacheHint,
    os: Os,
    /// Holders of this stream, the last `close` tears it down.
    refs: AtomicUsize,
    state: Mutex<State>,
}

struct State {
    // Field order is drop order: the view goes before its file.
    view: Option<View>,
    file: Option<FileHandle>,
    identity: Option<FileId>,
    /// Size of the data, as found on disk when opened and grown by writes.
    file_size: u64,
    /// File offset of the first byte of `view`.
    map_offset: u64,
    position: u64,
    last_error: Option<OsError>,
}

/// The bytes of the current view, borrowed under the stream's lock.
///
/// Any other operation on the same stream blocks until the guard is dropped, do not hold it while
/// calling into the stream on the same thread.
pub struct MappedData<'lt> {
    state: MutexGuard<'lt, State>,
}

impl MappedStream {
    /// Open `path` with the native OS functions.
    ///
    /// Failures of the OS do not produce an error but an invalid stream, see [`Self::try_open`].
    pub fn open(path: impl AsRef<Path>, mode: FileMode, options: &StreamOptions) -> Self {
        Self::open_with(Os::new(), path, mode, options)
    }

    /// Like [`Self::open`], but returns the first failure instead of an invalid stream.
    pub fn try_open(
        path: impl AsRef<Path>,
        mode: FileMode,
        options: &StreamOptions,
    ) -> Result<Self, Error> {
        let os = Os::new();
        let path = path.as_ref();
        let stat = os.stat(path);
        match Self::build(os, path, mode, options, stat) {
            (stream, None) => Ok(stream),
            (_, Some(err)) => Err(err),
        }
    }

    /// Open `path` through a specific table of OS functions.
    pub fn open_with(os: Os, path: impl AsRef<Path>, mode: FileMode, options: &StreamOptions) -> Self {
        let path = path.as_ref();
        let stat = os.stat(path);
        Self::build(os, path, mode, options, stat).0
    }

    /// Construct from the result of a `stat` of `path`.
    ///
    /// Always returns a stream. It is valid if and only if no error is returned alongside.
    pub(crate) fn build(
        os: Os,
        path: &Path,
        mode: FileMode,
        options: &StreamOptions,
        stat: Result<FileStat, OsError>,
    ) -> (Self, Option<Error>) {
        let stream = MappedStream {
            path: path.to_owned(),
            mode,
            hint: options.hint,
            os,
            refs: AtomicUsize::new(1),
            state: Mutex::new(State {
                view: None,
                file: None,
                identity: None,
                file_size: 0,
                map_offset: 0,
                position: 0,
                last_error: None,
            }),
        };

        let err = {
            let mut state = stream.state.lock();
            stream.initialize(&mut state, options, stat).err()
        };

        (stream, err)
    }

    fn initialize(
        &self,
        state: &mut State,
        options: &StreamOptions,
        stat: Result<FileStat, OsError>,
    ) -> Result<(), Error> {
        let identity = match stat {
            Ok(stat) => Some(FileId::new(&stat, self.mode)),
            // Created below, we learn the identity from the handle.
            Err(err) if err.is_not_found() && self.mode.creates() => None,
            Err(err) => {
                debug!(path = %self.path.display(), %err, "cannot stat file");
                state.last_error = Some(err);
                return Err(Error::Stat {
                    path: self.path.clone(),
                    source: err,
                });
            }
        };

        let flags = self.mode.open_flags(self.hint);
        let file = match self.os.open(&self.path, &flags) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %self.path.display(), mode = ?self.mode, %err, "cannot open file");
                state.last_error = Some(err);
                return Err(Error::Open {
                    path: self.path.clone(),
                    source: err,
                });
            }
        };

        let stat = match self.os.fstat(&file) {
            Ok(stat) => stat,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "cannot query file size");
                state.last_error = Some(err);
                return Err(Error::Stat {
                    path: self.path.clone(),
                    source: err,
                });
            }
        };

        state.identity = Some(identity.unwrap_or_else(|| FileId::new(&stat, self.mode)));
        state.file = Some(file);
        state.file_size = stat.size;

        if self.mode == FileMode::Append {
            state.position = stat.size;
        }

        let initial = usize::try_from(stat.size)
            .unwrap_or(usize::MAX)
            .max(options.min_size);
        self.remap_locked(state, 0, initial)?;

        debug!(
            path = %self.path.display(),
            mode = ?self.mode,
            size = state.file_size,
            mapped = self.mapped_len(state),
            "opened mapped stream"
        );

        Ok(())
    }

    /// Replace the view with one of `len` bytes starting at file offset `offset`.
    ///
    /// `offset` must be a multiple of [`Self::page_size`] and not beyond the end of the file.
    /// The previous view is unmapped in any case; on failure the stream stays invalid until a
    /// later `remap` succeeds.
    pub fn remap(&self, offset: u64, len: usize) -> bool {
        self.try_remap(offset, len).is_ok()
    }

    /// Like [`Self::remap`] but reporting why it failed.
    pub fn try_remap(&self, offset: u64, len: usize) -> Result<(), Error> {
        let mut state = self.state.lock();
        self.remap_locked(&mut state, offset, len)
    }

    fn remap_locked(&self, state: &mut State, offset: u64, len: usize) -> Result<(), Error> {
        if let Some(view) = state.view.take() {
            // Not fatal, the address range is gone for us either way.
            if let Err(err) = view.unmap() {
                warn!(path = %self.path.display(), %err, "unmapping the previous view failed");
                state.last_error = Some(err);
            }
        }

        state.map_offset = 0;

        let page_size = self.os.page_size();
        if page_size == 0 || offset % page_size as u64 != 0 {
            return Err(Error::Misaligned { offset, page_size });
        }

        if offset > state.file_size {
            return Err(Error::OutOfRange {
                offset,
                size: state.file_size,
            });
        }

        let Some(file) = state.file.as_ref() else {
            return Err(Error::InvalidStream);
        };

        let request = MapRequest {
            offset,
            len,
            protection: self.mode.protection(),
            hint: self.hint,
        };

        match self.os.map(file, &request) {
            Ok(view) => {
                view.advise(self.hint);
                debug!(path = %self.path.display(), offset, len = view.len(), "mapped view");
                state.map_offset = offset;
                state.view = Some(view);
                Ok(())
            }
            Err(err) => {
                warn!(path = %self.path.display(), offset, len, %err, "cannot map view");
                state.last_error = Some(err);
                Err(Error::Map {
                    path: self.path.clone(),
                    source: err,
                })
            }
        }
    }

    fn mapped_len(&self, state: &State) -> usize {
        state.view.as_ref().map_or(0, View::len)
    }

    /// Number of bytes of the current view, `0` when unmapped.
    pub fn mapped_size(&self) -> usize {
        self.mapped_len(&self.state.lock())
    }

    /// File offset at which the current view starts.
    pub fn map_offset(&self) -> u64 {
        self.state.lock().map_offset
    }

    /// The granularity of view offsets on this platform.
    pub fn page_size(&self) -> usize {
        self.os.page_size()
    }

    /// Write the view back to the file. Returns `false` when unmapped or if the OS failed.
    pub fn save(&self) -> bool {
        let mut state = self.state.lock();
        let result = match (state.view.as_ref(), state.file.as_ref()) {
            (Some(view), Some(file)) => view.flush(file),
            _ => return false,
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "cannot flush view");
                state.last_error = Some(err);
                false
            }
        }
    }

    /// Borrow the bytes of the view, exactly [`Self::mapped_size`] of them.
    ///
    /// `None` when unmapped, or for write-only modes whose view may not be readable.
    pub fn data(&self) -> Option<MappedData<'_>> {
        if !self.mode.readable() {
            return None;
        }

        let state = self.state.lock();
        state.view.as_ref()?;
        Some(MappedData { state })
    }

    /// Read the byte at `offset` of the view without any checks.
    ///
    /// # Safety
    ///
    /// The stream must be mapped and `offset` less than [`Self::mapped_size`]. For write-only
    /// modes the platform may fault on reading.
    pub unsafe fn get_unchecked(&self, offset: usize) -> u8 {
        let state = self.state.lock();
        let ptr = state.view.as_ref().map_or(core::ptr::null(), View::as_ptr);
        *ptr.add(offset)
    }

    /// Read the byte at file offset `offset`.
    pub fn at(&self, offset: u64) -> Result<u8, Error> {
        if !self.mode.readable() {
            return Err(Error::NotReadable { mode: self.mode });
        }

        let state = self.state.lock();
        let Some(view) = state.view.as_ref() else {
            return Err(Error::InvalidStream);
        };

        let out_of_range = Error::OutOfRange {
            offset,
            size: state.file_size,
        };

        if offset >= state.file_size {
            return Err(out_of_range);
        }

        match offset.checked_sub(state.map_offset) {
            Some(index) if index < view.len() as u64 => {
                // Safety: in bounds of the live view, which is readable.
                Ok(unsafe { *view.as_ptr().add(index as usize) })
            }
            _ => Err(out_of_range),
        }
    }

    pub fn identity(&self) -> Option<FileId> {
        self.state.lock().identity
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn hint(&self) -> CacheHint {
        self.hint
    }

    /// The most recent OS failure, including absorbed ones such as a failed unmap.
    pub fn last_error(&self) -> Option<OsError> {
        self.state.lock().last_error
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn has_ref(&self) -> bool {
        self.ref_count() > 0
    }

    /// Register another holder. Each one must be matched by a `close`.
    ///
    /// Returns `false` once the stream has been closed for good, a torn down stream is never
    /// revived.
    pub fn add_ref(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then(|| n + 1)
            })
            .is_ok()
    }

    /// Tear down regardless of the remaining holders.
    pub(crate) fn shutdown(&self) {
        self.refs.store(0, Ordering::Release);
        self.teardown();
    }

    fn teardown(&self) {
        let mut state = self.state.lock();

        if let Some(view) = state.view.take() {
            if let Err(err) = view.unmap() {
                warn!(path = %self.path.display(), %err, "unmap failed on close");
                state.last_error = Some(err);
            }
        }

        if let Some(file) = state.file.take() {
            if let Err(err) = file.close() {
                warn!(path = %self.path.display(), %err, "close failed");
                state.last_error = Some(err);
            }
        }

        state.file_size = 0;
        state.map_offset = 0;
        state.position = 0;
        debug!(path = %self.path.display(), "closed mapped stream");
    }
}

impl DataStream for MappedStream {
    fn read(&self, buffer: &mut [u8]) -> usize {
        if !self.mode.readable() {
            return 0;
        }

        let mut state = self.state.lock();
        let Some(view) = state.view.as_ref() else {
            return 0;
        };

        let Some(start) = state.position.checked_sub(state.map_offset) else {
            return 0;
        };

        let end = state
            .file_size
            .min(state.map_offset + view.len() as u64);
        let amount = end
            .saturating_sub(state.position)
            .min(buffer.len() as u64) as usize;

        if amount > 0 {
            // Safety: `start + amount` lies within the view, the buffer is a distinct allocation.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    view.as_ptr().add(start as usize),
                    buffer.as_mut_ptr(),
                    amount,
                )
            };
        }

        state.position += amount as u64;
        amount
    }

    fn write(&self, buffer: &[u8]) -> usize {
        if !self.mode.writable() {
            return 0;
        }

        let mut state = self.state.lock();
        let Some(view) = state.view.as_ref() else {
            return 0;
        };

        let Some(start) = state.position.checked_sub(state.map_offset) else {
            return 0;
        };

        let end = state.map_offset + view.len() as u64;
        let amount = end
            .saturating_sub(state.position)
            .min(buffer.len() as u64) as usize;

        if amount > 0 {
            // Safety: `start + amount` lies within the writable view.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    buffer.as_ptr(),
                    view.as_mut_ptr().add(start as usize),
                    amount,
                )
            };
        }

        state.position += amount as u64;
        // The view already owns its extent on disk, so written bytes are data of the file.
        state.file_size = state.file_size.max(state.position);
        amount
    }

    fn seek(&self, pos: SeekFrom) -> bool {
        let mut state = self.state.lock();
        match resolve(pos, state.position, state.file_size) {
            Some(target) => {
                state.position = target;
                true
            }
            None => false,
        }
    }

    fn eof(&self) -> bool {
        let state = self.state.lock();
        state.position >= state.file_size
    }

    fn tell(&self) -> u64 {
        self.state.lock().position
    }

    fn size(&self) -> u64 {
        self.state.lock().file_size
    }

    fn is_valid(&self) -> bool {
        self.state.lock().view.is_some()
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn close(&self) {
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        // An `Err` means the stream was already closed, nothing left to release.
        if previous == Ok(1) {
            self.teardown();
        }
    }

    fn try_clone(&self) -> Result<Arc<dyn DataStream>, Error> {
        Err(Error::NotSupported)
    }
}

impl MappedData<'_> {
    /// File offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.state.map_offset
    }
}

impl core::ops::Deref for MappedData<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self.state.view.as_ref() {
            // Safety: the view is live while we hold the lock, and valid for `len` bytes.
            Some(view) => unsafe { core::slice::from_raw_parts(view.as_ptr(), view.len()) },
            None => &[],
        }
    }
}

impl io::Read for &MappedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(DataStream::read(*self, buf))
    }
}

impl io::Write for &MappedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(DataStream::write(*self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.save() {
            Ok(())
        } else {
            let err = self.last_error().map_or_else(
                || io::Error::new(io::ErrorKind::Other, Error::InvalidStream),
                io::Error::from,
            );
            Err(err)
        }
    }
}

impl io::Seek for &MappedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if DataStream::seek(*self, pos) {
            Ok(self.tell())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek target outside of the file",
            ))
        }
    }
}

impl core::fmt::Debug for MappedStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MappedStream")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("size", &state.file_size)
            .field("mapped", &self.mapped_len(&state))
            .field("position", &state.position)
            .field("refs", &self.ref_count())
            .finish()
    }
}
