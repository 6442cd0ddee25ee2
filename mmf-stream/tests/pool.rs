use std::sync::Arc;

use mmf_stream::{DataStream, Error, FileMode, MappedFilePool, PoolOptions, StreamOptions};

fn scratch(contents: &[u8]) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), contents).unwrap();
    file
}

#[test]
fn same_file_shares_one_stream() {
    let file = scratch(b"shared contents");
    let pool = MappedFilePool::new();

    let first = pool.open_file(file.path(), FileMode::Read).unwrap();
    let second = pool.open_file(file.path(), FileMode::Read).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.ref_count(), 2);
    assert_eq!(pool.len(), 1);

    pool.close_file(file.path(), FileMode::Read).unwrap();
    assert!(first.is_valid());
    assert_eq!(first.ref_count(), 1);
    assert!(pool.contains(file.path(), FileMode::Read));

    pool.close_file(file.path(), FileMode::Read).unwrap();
    assert!(!first.is_valid());
    assert!(pool.is_empty());
}

#[cfg(unix)]
#[test]
fn hard_links_are_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("original.bin");
    let link = dir.path().join("link.bin");
    std::fs::write(&original, b"linked").unwrap();
    std::fs::hard_link(&original, &link).unwrap();

    let pool = MappedFilePool::new();
    let a = pool.open_file(&original, FileMode::Read).unwrap();
    let b = pool.open_file(&link, FileMode::Read).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.identity(), b.identity());
    assert_eq!(pool.len(), 1);

    pool.close_file(&link, FileMode::Read).unwrap();
    pool.close_file(&original, FileMode::Read).unwrap();
    assert!(pool.is_empty());
}

#[test]
fn modes_are_pooled_apart() {
    let file = scratch(&[7; 128]);
    let pool = MappedFilePool::new();

    let read = pool.open_file(file.path(), FileMode::Read).unwrap();
    let write = pool.open_file(file.path(), FileMode::ReadWrite).unwrap();
    assert!(!Arc::ptr_eq(&read, &write));
    assert_eq!(pool.len(), 2);
    assert_eq!(read.ref_count(), 1);
    assert_eq!(write.ref_count(), 1);

    pool.close_file(file.path(), FileMode::ReadWrite).unwrap();
    assert!(read.is_valid());
    assert!(!pool.contains(file.path(), FileMode::ReadWrite));
    assert!(pool.contains(file.path(), FileMode::Read));
}

#[test]
fn missing_file_gives_an_invalid_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.bin");
    let pool = MappedFilePool::new();

    let stream = pool.open_file(&path, FileMode::Read).unwrap();
    assert!(!stream.is_valid());
    assert_eq!(stream.size(), 0);
    assert!(pool.is_empty());
    assert!(!path.exists());

    assert!(matches!(
        pool.close_file(&path, FileMode::Read),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn creating_modes_are_pooled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("created.bin");
    let pool = MappedFilePool::with_options(PoolOptions {
        stream: StreamOptions::with_min_size(512),
        ..PoolOptions::default()
    });

    let stream = pool.open_file(&path, FileMode::ReadWrite).unwrap();
    assert!(stream.is_valid());
    assert!(path.exists());
    assert_eq!(stream.mapped_size(), 512);
    assert!(pool.contains(&path, FileMode::ReadWrite));

    let again = pool.open_file(&path, FileMode::ReadWrite).unwrap();
    assert!(Arc::ptr_eq(&stream, &again));
}

#[test]
fn closing_unknown_files_fails() {
    let file = scratch(b"never opened");
    let pool = MappedFilePool::new();

    assert!(matches!(
        pool.close_file(file.path(), FileMode::Read),
        Err(Error::NotFound { .. })
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        pool.close_file(dir.path().join("gone.bin"), FileMode::Read),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn streams_from_elsewhere_are_not_closed() {
    let file = scratch(b"two pools");
    let pool = MappedFilePool::new();
    let other = MappedFilePool::new();

    let ours = pool.open_file(file.path(), FileMode::Read).unwrap();
    let theirs = other.open_file(file.path(), FileMode::Read).unwrap();

    assert!(matches!(pool.close_stream(&theirs), Err(Error::NotFound { .. })));
    assert!(theirs.is_valid());

    pool.close_stream(&ours).unwrap();
    assert!(pool.is_empty());
    other.close_stream(&theirs).unwrap();
    assert!(other.is_empty());
}

#[cfg(unix)]
#[test]
fn close_stream_after_unlink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unlinked.bin");
    std::fs::write(&path, [1; 32]).unwrap();

    let pool = MappedFilePool::new();
    let stream = pool.open_file(&path, FileMode::Read).unwrap();
    std::fs::remove_file(&path).unwrap();

    // The mapping outlives the directory entry.
    assert_eq!(stream.at(31).ok(), Some(1));
    assert!(matches!(
        pool.close_file(&path, FileMode::Read),
        Err(Error::NotFound { .. })
    ));

    pool.close_stream(&stream).unwrap();
    assert!(pool.is_empty());
    assert!(!stream.is_valid());
}

#[test]
fn concurrent_open_and_close() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;

    let file = scratch(&[9; 4096]);
    let pool = MappedFilePool::new();

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..ROUNDS {
                    let stream = pool.open_file(file.path(), FileMode::Read).unwrap();
                    assert!(stream.is_valid());
                    assert_eq!(stream.at(4095).ok(), Some(9));
                    pool.close_file(file.path(), FileMode::Read).unwrap();
                }
            });
        }
    });

    assert!(pool.is_empty());
}

#[test]
fn concurrent_reads_split_the_data() {
    const SIZE: usize = 64 * 1024;
    const THREADS: usize = 4;

    let file = scratch(&vec![1; SIZE]);
    let pool = MappedFilePool::new();
    let stream = pool.open_file(file.path(), FileMode::Read).unwrap();

    let total: usize = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let stream = Arc::clone(&stream);
                scope.spawn(move || {
                    let mut buffer = [0; 100];
                    let mut count = 0;
                    loop {
                        let n = stream.read(&mut buffer);
                        if n == 0 {
                            break count;
                        }
                        assert!(buffer[..n].iter().all(|&b| b == 1));
                        count += n;
                    }
                })
            })
            .collect();

        workers.into_iter().map(|w| w.join().unwrap()).sum()
    });

    assert_eq!(total, SIZE);
    assert!(stream.eof());
}

#[test]
fn closed_outside_the_pool_is_not_revived() {
    let file = scratch(b"closed directly");
    let pool = MappedFilePool::new();

    let first = pool.open_file(file.path(), FileMode::Read).unwrap();
    first.close();
    assert!(!first.is_valid());
    assert_eq!(first.ref_count(), 0);
    assert!(!pool.contains(file.path(), FileMode::Read));

    let second = pool.open_file(file.path(), FileMode::Read).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_valid());
    assert_eq!(second.ref_count(), 1);
    assert_eq!(second.size(), 15);
    assert_eq!(pool.len(), 1);

    // The dead stream stays dead.
    assert!(!first.is_valid());
    assert_eq!(first.ref_count(), 0);

    pool.close_file(file.path(), FileMode::Read).unwrap();
    assert!(pool.is_empty());
}

#[test]
fn remap_races_readers_and_writers() {
    const ROUNDS: usize = 200;

    let page = mmf_stream::Os::new().page_size();
    let data: Vec<u8> = (0..3 * page).map(|i| (i % 251) as u8).collect();
    let file = scratch(&data);
    let pool = MappedFilePool::new();
    let stream = pool.open_file(file.path(), FileMode::ReadWrite).unwrap();
    assert_eq!(stream.mapped_size(), data.len());

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for round in 0..ROUNDS {
                if round % 2 == 0 {
                    assert!(stream.remap(page as u64, page));
                } else {
                    assert!(stream.remap(0, data.len()));
                }
            }
        });

        // Views are consistent with the file wherever they start.
        scope.spawn(|| {
            for _ in 0..ROUNDS {
                if let Some(view) = stream.data() {
                    let start = view.offset() as usize;
                    assert_eq!(&view[..], &data[start..start + view.len()]);
                }
            }
        });

        scope.spawn(|| {
            for round in 0..ROUNDS {
                let offset = (round * 97) % data.len();
                match stream.at(offset as u64) {
                    Ok(byte) => assert_eq!(byte, data[offset]),
                    Err(err) => assert!(matches!(err, Error::OutOfRange { .. }), "{err}"),
                }
            }
        });

        // The only user of the cursor. Writes put back what is already there.
        scope.spawn(|| {
            let mut buffer = [0; 64];
            for round in 0..ROUNDS {
                let offset = (round * 131) % (data.len() - buffer.len());
                assert!(stream.seek(std::io::SeekFrom::Start(offset as u64)));

                let n = if round % 2 == 0 {
                    stream.write(&data[offset..offset + buffer.len()])
                } else {
                    let n = stream.read(&mut buffer);
                    assert_eq!(buffer[..n], data[offset..offset + n]);
                    n
                };

                assert!(n == 0 || stream.tell() == (offset + n) as u64);
            }
        });
    });

    assert!(stream.remap(0, data.len()));
    assert_eq!(&stream.data().unwrap()[..], &data[..]);
    pool.close_stream(&stream).unwrap();
    assert_eq!(std::fs::read(file.path()).unwrap(), data);
}

#[test]
fn global_pool_is_shared() {
    let a = MappedFilePool::global();
    let b = MappedFilePool::global();
    assert!(std::ptr::eq(a, b));

    let file = scratch(b"global");
    let stream = a.open_file(file.path(), FileMode::Read).unwrap();
    assert!(b.contains(file.path(), FileMode::Read));
    b.close_stream(&stream).unwrap();
    assert!(!a.contains(file.path(), FileMode::Read));
}

#[test]
fn drain_empties_the_pool() {
    let first = scratch(b"first");
    let second = scratch(b"second");
    let pool = MappedFilePool::new();

    let a = pool.open_file(first.path(), FileMode::Read).unwrap();
    let _b = pool.open_file(second.path(), FileMode::Read).unwrap();
    assert_eq!(pool.drain(), 2);
    assert!(pool.is_empty());
    assert!(!a.is_valid());

    // A fresh open maps the file anew.
    let c = pool.open_file(first.path(), FileMode::Read).unwrap();
    assert!(c.is_valid());
    assert!(!Arc::ptr_eq(&a, &c));
}
