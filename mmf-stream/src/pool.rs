//! Share one mapping per physical file.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use mmf_os::{FileStat, Os, OsError};
use parking_lot::Mutex;
use tracing::debug;

use crate::{DataStream, Error, FileId, FileMode, MappedStream, StreamOptions};

/// A cache of open streams, keyed by [`FileId`].
///
/// Opening a file that is already open in the same mode returns the existing stream with one
/// more reference. Every `open_file` must be matched by a `close_file`, the last one unmaps the
/// file and evicts it.
///
/// The table is guarded by a single lock. Lookup-or-insert and decrement-then-evict each happen
/// entirely under it, so an open can not revive a stream that is being torn down.
pub struct MappedFilePool {
    os: Os,
    options: PoolOptions,
    table: Mutex<BTreeMap<FileId, Arc<MappedStream>>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolOptions {
    /// Keep streams in the table even if they could not be opened or mapped.
    ///
    /// Such an entry answers every further open of the same file with the invalid stream until it
    /// is closed. Off by default.
    pub cache_invalid: bool,
    /// Used for streams constructed by [`MappedFilePool::open_file`].
    pub stream: StreamOptions,
}

impl MappedFilePool {
    pub fn new() -> Self {
        Self::with_options(PoolOptions::default())
    }

    pub fn with_options(options: PoolOptions) -> Self {
        Self::with_os(Os::new(), options)
    }

    /// A pool using a custom table of OS functions.
    pub fn with_os(os: Os, options: PoolOptions) -> Self {
        MappedFilePool {
            os,
            options,
            table: Mutex::new(BTreeMap::new()),
        }
    }

    /// The process-wide pool, created on first use.
    pub fn global() -> &'static MappedFilePool {
        static GLOBAL: OnceLock<MappedFilePool> = OnceLock::new();
        GLOBAL.get_or_init(MappedFilePool::new)
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Open `path`, sharing the stream if the same file is already open in `mode`.
    ///
    /// The returned stream may be invalid, check [`DataStream::is_valid`]. Fails only if the
    /// identity of an existing path can not be determined.
    pub fn open_file(
        &self,
        path: impl AsRef<Path>,
        mode: FileMode,
    ) -> Result<Arc<MappedStream>, Error> {
        self.open_file_with(path, mode, &self.options.stream)
    }

    /// Like [`Self::open_file`], with options for the stream if it has to be constructed.
    ///
    /// Options are ignored when an existing stream is shared.
    pub fn open_file_with(
        &self,
        path: impl AsRef<Path>,
        mode: FileMode,
        options: &StreamOptions,
    ) -> Result<Arc<MappedStream>, Error> {
        let path = path.as_ref();
        let mut table = self.table.lock();

        let stat = match self.os.stat(path) {
            Ok(stat) => Ok(stat),
            // A missing file is not an identity failure. It is either created or yields an
            // invalid stream, both decided by the stream itself.
            Err(err) if err.is_not_found() => Err(err),
            Err(source) => {
                return Err(Error::Stat {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        if let Ok(stat) = &stat {
            let identity = FileId::new(stat, mode);
            if let Some(stream) = Self::share(&mut table, &identity) {
                debug!(path = %path.display(), refs = stream.ref_count(), "shared pooled stream");
                return Ok(stream);
            }
        }

        Ok(self.insert_new(&mut table, path, mode, options, stat))
    }

    fn insert_new(
        &self,
        table: &mut BTreeMap<FileId, Arc<MappedStream>>,
        path: &Path,
        mode: FileMode,
        options: &StreamOptions,
        stat: Result<FileStat, OsError>,
    ) -> Arc<MappedStream> {
        let known = stat.as_ref().ok().map(|stat| FileId::new(stat, mode));
        let (stream, err) = MappedStream::build(self.os.clone(), path, mode, options, stat);
        let stream = Arc::new(stream);

        if let Some(err) = err {
            if !self.options.cache_invalid {
                debug!(path = %path.display(), %err, "not pooling invalid stream");
                return stream;
            }
        }

        let Some(identity) = known.or_else(|| stream.identity()) else {
            // Nothing to key it by, e.g. a missing file opened for reading.
            return stream;
        };

        // A created file may turn out to be one we have open under another path.
        if let Some(existing) = Self::share(table, &identity) {
            return existing;
        }

        debug!(path = %path.display(), ?identity, "pooled new stream");
        table.insert(identity, stream.clone());
        stream
    }

    /// Take another reference of the entry for `identity`.
    ///
    /// An entry whose holders closed it directly, without the pool, is dead and dropped here.
    fn share(
        table: &mut BTreeMap<FileId, Arc<MappedStream>>,
        identity: &FileId,
    ) -> Option<Arc<MappedStream>> {
        let stream = table.get(identity)?;
        if stream.add_ref() {
            return Some(stream.clone());
        }

        debug!(path = %stream.path().display(), "evicted stream closed outside the pool");
        table.remove(identity);
        None
    }

    /// Release one reference of `path` opened in `mode`, evicting it with the last one.
    pub fn close_file(&self, path: impl AsRef<Path>, mode: FileMode) -> Result<(), Error> {
        let path = path.as_ref();
        let mut table = self.table.lock();

        let identity = match FileId::of_path(&self.os, path, mode) {
            Ok(identity) => identity,
            Err(err) if err.is_not_found() => {
                return Err(Error::NotFound {
                    path: path.to_owned(),
                })
            }
            Err(source) => {
                return Err(Error::Stat {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        Self::release(&mut table, &identity, path)
    }

    /// Release one reference of a stream returned by this pool.
    ///
    /// Unlike [`Self::close_file`] this does not look at the file system, so it also works after
    /// the path was renamed or removed.
    pub fn close_stream(&self, stream: &Arc<MappedStream>) -> Result<(), Error> {
        let mut table = self.table.lock();
        let not_found = || Error::NotFound {
            path: stream.path().to_owned(),
        };

        let identity = stream.identity().ok_or_else(not_found)?;
        match table.get(&identity) {
            Some(pooled) if Arc::ptr_eq(pooled, stream) => {}
            _ => return Err(not_found()),
        }

        Self::release(&mut table, &identity, stream.path())
    }

    fn release(
        table: &mut BTreeMap<FileId, Arc<MappedStream>>,
        identity: &FileId,
        path: &Path,
    ) -> Result<(), Error> {
        let Some(stream) = table.get(identity) else {
            return Err(Error::NotFound {
                path: path.to_owned(),
            });
        };

        stream.close();

        if !stream.has_ref() {
            debug!(path = %path.display(), "evicted pooled stream");
            table.remove(identity);
        }

        Ok(())
    }

    /// Whether `path` in `mode` is currently pooled.
    pub fn contains(&self, path: impl AsRef<Path>, mode: FileMode) -> bool {
        let table = self.table.lock();
        match FileId::of_path(&self.os, path.as_ref(), mode) {
            Ok(identity) => table.get(&identity).is_some_and(|stream| stream.has_ref()),
            Err(_) => false,
        }
    }

    /// Number of pooled streams.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every pooled stream and empty the table. Returns the number of streams.
    ///
    /// Remaining holders keep their `Arc`s but the streams are invalid from now on.
    pub fn drain(&self) -> usize {
        // Holding the lock throughout keeps opens and closes out until the table is empty.
        let mut table = self.table.lock();
        let count = table.len();

        for stream in table.values() {
            stream.shutdown();
        }

        table.clear();
        debug!(count, "drained pool");
        count
    }
}

impl Default for MappedFilePool {
    fn default() -> Self {
        MappedFilePool::new()
    }
}
