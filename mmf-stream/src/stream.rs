use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use crate::Error;

/// A byte stream with a cursor.
///
/// All methods take `&self`: implementations synchronize internally so that one stream can be
/// shared between threads behind an `Arc`. Holders of a shared stream share its cursor.
pub trait DataStream: Send + Sync {
    /// Read into `buffer`, returning the number of bytes read.
    ///
    /// Returns `0` at the end of the data. Reaching the end is not an error.
    fn read(&self, buffer: &mut [u8]) -> usize;

    /// Write from `buffer`, returning the number of bytes written.
    ///
    /// Short writes are clamped results, not errors. Nothing grows implicitly.
    fn write(&self, buffer: &[u8]) -> usize;

    /// Move the cursor. Returns `false` and leaves the cursor in place when the target lies
    /// outside `0..=size()`.
    fn seek(&self, pos: SeekFrom) -> bool;

    fn eof(&self) -> bool;

    fn tell(&self) -> u64;

    /// Size of the stream, `0` if unknown.
    fn size(&self) -> u64 {
        0
    }

    fn is_valid(&self) -> bool;

    fn path(&self) -> &Path;

    /// Release this holder's use of the stream. Calling it again has no effect once the stream
    /// is closed.
    fn close(&self);

    /// Open an independent stream of the same source.
    fn try_clone(&self) -> Result<Arc<dyn DataStream>, Error> {
        Err(Error::NotSupported)
    }
}

/// Resolve a seek target within `0..=size`.
pub(crate) fn resolve(pos: SeekFrom, current: u64, size: u64) -> Option<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => size.checked_add_signed(delta),
    };

    target.filter(|&target| target <= size)
}

#[test]
fn resolve_bounds() {
    assert_eq!(resolve(SeekFrom::Start(0), 5, 10), Some(0));
    assert_eq!(resolve(SeekFrom::Start(10), 5, 10), Some(10));
    assert_eq!(resolve(SeekFrom::Start(11), 5, 10), None);
    assert_eq!(resolve(SeekFrom::Current(-5), 5, 10), Some(0));
    assert_eq!(resolve(SeekFrom::Current(-6), 5, 10), None);
    assert_eq!(resolve(SeekFrom::Current(6), 5, 10), None);
    assert_eq!(resolve(SeekFrom::End(-10), 5, 10), Some(0));
    assert_eq!(resolve(SeekFrom::End(1), 5, 10), None);
}
