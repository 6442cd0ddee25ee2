use crate::{DataStream, FileMode, MappedFilePool, MappedStream, PoolOptions, StreamOptions};
use mmf_os::{MapRequest, Os, OsErrorKind, OsVTable, RawHandle, RawView};

fn failing_map(_: RawHandle, _: &MapRequest) -> Result<RawView, i32> {
    Err(12)
}

/// Really unmaps, then claims it did not.
fn failing_unmap(view: &RawView) -> Result<(), i32> {
    let _ = (OsVTable::native().unmap)(view);
    Err(22)
}

fn os_with(patch: impl FnOnce(&mut OsVTable)) -> Os {
    let mut vtable = OsVTable::native();
    patch(&mut vtable);
    // Safety: the patched functions fail, or delegate to the native ones.
    unsafe { Os::new_unchecked(vtable) }
}

fn scratch(contents: &[u8]) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), contents).unwrap();
    file
}

#[test]
fn failed_map_is_invalid() {
    let file = scratch(b"Hello, world!");
    let os = os_with(|vt| vt.map = failing_map);

    let stream = MappedStream::open_with(os, file.path(), FileMode::Read, &StreamOptions::default());
    assert!(!stream.is_valid());
    assert_eq!(stream.mapped_size(), 0);
    assert_eq!(stream.last_error().map(|err| err.kind()), Some(OsErrorKind::Map));
    assert_eq!(stream.last_error().map(|err| err.code()), Some(12));

    let mut buffer = [0; 4];
    assert_eq!(stream.read(&mut buffer), 0);
    assert!(matches!(stream.at(0), Err(crate::Error::InvalidStream)));
}

#[test]
fn invalid_streams_are_not_pooled() {
    let file = scratch(b"Hello, world!");
    let pool = MappedFilePool::with_os(os_with(|vt| vt.map = failing_map), PoolOptions::default());

    let first = pool.open_file(file.path(), FileMode::Read).unwrap();
    assert!(!first.is_valid());
    assert!(pool.is_empty());

    let second = pool.open_file(file.path(), FileMode::Read).unwrap();
    assert!(!std::sync::Arc::ptr_eq(&first, &second));

    assert!(matches!(
        pool.close_file(file.path(), FileMode::Read),
        Err(crate::Error::NotFound { .. })
    ));
}

#[test]
fn invalid_streams_pooled_on_request() {
    let file = scratch(b"Hello, world!");
    let options = PoolOptions {
        cache_invalid: true,
        ..PoolOptions::default()
    };
    let pool = MappedFilePool::with_os(os_with(|vt| vt.map = failing_map), options);

    let first = pool.open_file(file.path(), FileMode::Read).unwrap();
    let second = pool.open_file(file.path(), FileMode::Read).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert!(!second.is_valid());
    assert_eq!(second.ref_count(), 2);

    pool.close_file(file.path(), FileMode::Read).unwrap();
    pool.close_file(file.path(), FileMode::Read).unwrap();
    assert!(pool.is_empty());
}

#[test]
fn unmap_failure_is_observable() {
    let file = scratch(&[1; 64]);
    let os = os_with(|vt| vt.unmap = failing_unmap);

    let stream = MappedStream::open_with(os, file.path(), FileMode::Read, &StreamOptions::default());
    assert!(stream.is_valid());
    assert_eq!(stream.last_error(), None);

    assert!(stream.remap(0, 32));
    assert!(stream.is_valid());
    assert_eq!(stream.mapped_size(), 32);
    assert_eq!(stream.last_error().map(|err| err.kind()), Some(OsErrorKind::Unmap));
}

#[test]
fn close_counts_down_once() {
    let file = scratch(&[5; 16]);
    let stream = MappedStream::open(file.path(), FileMode::Read, &StreamOptions::default());
    assert_eq!(stream.ref_count(), 1);

    assert!(stream.add_ref());
    stream.close();
    assert!(stream.is_valid());
    assert_eq!(stream.ref_count(), 1);

    stream.close();
    assert!(!stream.is_valid());
    assert_eq!(stream.size(), 0);
    assert_eq!(stream.ref_count(), 0);

    // Already closed, nothing to underflow or unmap twice.
    stream.close();
    assert_eq!(stream.ref_count(), 0);
    assert!(!stream.has_ref());

    // Nor to revive.
    assert!(!stream.add_ref());
    assert_eq!(stream.ref_count(), 0);
}

#[test]
fn misaligned_remap_leaves_unmapped() {
    let file = scratch(&[3; 8192]);
    let stream = MappedStream::open(file.path(), FileMode::Read, &StreamOptions::default());
    assert!(stream.is_valid());

    assert!(matches!(
        stream.try_remap(1, 16),
        Err(crate::Error::Misaligned { offset: 1, .. })
    ));
    assert!(!stream.is_valid());

    assert!(stream.remap(0, 16));
    assert_eq!(stream.mapped_size(), 16);
}

#[test]
fn drain_invalidates_holders() {
    let dir = tempfile::tempdir().unwrap();
    let pool = MappedFilePool::new();
    let options = StreamOptions::with_min_size(128);

    let a = pool.open_file_with(dir.path().join("a.bin"), FileMode::ReadWrite, &options).unwrap();
    let b = pool.open_file_with(dir.path().join("b.bin"), FileMode::ReadWrite, &options).unwrap();
    let _again = pool.open_file(dir.path().join("a.bin"), FileMode::ReadWrite).unwrap();
    assert_eq!(pool.len(), 2);

    assert_eq!(pool.drain(), 2);
    assert!(pool.is_empty());
    assert!(!a.is_valid() && !b.is_valid());
    assert_eq!(a.ref_count(), 0);
    assert_eq!(a.write(b"late"), 0);
}
