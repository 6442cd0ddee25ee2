//! The `mmap` family.
use core::ffi::c_void;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::{last_code, CacheHint, FileStat, MapRequest, OpenFlags, OsVTable, RawHandle, RawView};

pub(crate) fn vtable() -> OsVTable {
    OsVTable {
        stat: _stat,
        open: _open,
        fstat: _fstat,
        map: _map,
        unmap: _munmap,
        flush: _msync,
        advise: _madvise,
        close: _close,
        page_size: _page_size,
    }
}

fn c_path(path: &Path) -> Result<CString, i32> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| libc::EINVAL)
}

fn fd(handle: RawHandle) -> Result<libc::c_int, i32> {
    libc::c_int::try_from(handle.0).map_err(|_| libc::EBADF)
}

fn from_libc(lstat: &libc::stat) -> FileStat {
    FileStat {
        device: lstat.st_dev as u64,
        serial: lstat.st_ino as u64,
        size: u64::try_from(lstat.st_size).unwrap_or(0),
    }
}

fn _stat(path: &Path) -> Result<FileStat, i32> {
    let path = c_path(path)?;
    let mut uninit = core::mem::MaybeUninit::<libc::stat>::zeroed();
    // Safety: passing a nul-terminated path and the correct pointer to a struct of libc::stat.
    if -1 == unsafe { libc::stat(path.as_ptr(), uninit.as_mut_ptr()) } {
        return Err(last_code());
    }

    // Safety: always initialized on return with success.
    Ok(from_libc(unsafe { uninit.assume_init_ref() }))
}

fn _fstat(handle: RawHandle) -> Result<FileStat, i32> {
    let fd = fd(handle)?;
    let mut uninit = core::mem::MaybeUninit::<libc::stat>::zeroed();
    // Safety: passing the correct pointer to a struct of libc::stat.
    if -1 == unsafe { libc::fstat(fd, uninit.as_mut_ptr()) } {
        return Err(last_code());
    }

    // Safety: always initialized on return with success.
    Ok(from_libc(unsafe { uninit.assume_init_ref() }))
}

fn _open(path: &Path, flags: &OpenFlags) -> Result<RawHandle, i32> {
    let path = c_path(path)?;

    let mut oflag = match (flags.read, flags.write) {
        (_, false) => libc::O_RDONLY,
        (false, true) => libc::O_WRONLY,
        (true, true) => libc::O_RDWR,
    };

    if flags.create {
        oflag |= libc::O_CREAT;
    }

    oflag |= libc::O_CLOEXEC;

    // Safety: nul-terminated path, the mode argument is read only with `O_CREAT`.
    let fd = unsafe { libc::open(path.as_ptr(), oflag, 0o600 as libc::c_uint) };
    if fd < 0 {
        return Err(last_code());
    }

    Ok(RawHandle(fd as isize))
}

fn _map(handle: RawHandle, request: &MapRequest) -> Result<RawView, i32> {
    let fd = fd(handle)?;
    let size = _fstat(handle)?.size;

    let offset = libc::off_t::try_from(request.offset).map_err(|_| libc::EOVERFLOW)?;
    let end = request
        .offset
        .checked_add(request.len as u64)
        .ok_or(libc::EOVERFLOW)?;

    let len = if request.protection.writable() {
        // Touching pages past the end of the file raises SIGBUS, so writable views own their
        // extent on disk.
        if end > size {
            let end = libc::off_t::try_from(end).map_err(|_| libc::EFBIG)?;
            if -1 == unsafe { libc::ftruncate(fd, end) } {
                return Err(last_code());
            }
        }

        request.len
    } else {
        let available = size.saturating_sub(request.offset);
        request.len.min(usize::try_from(available).unwrap_or(usize::MAX))
    };

    if len == 0 {
        return Err(libc::EINVAL);
    }

    let prot = match request.protection {
        crate::Protection::Read => libc::PROT_READ,
        crate::Protection::Write => libc::PROT_WRITE,
        crate::Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
    };

    // Safety: we let the kernel choose the address, nothing is overwritten.
    let addr = unsafe { libc::mmap(core::ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, offset) };
    if addr == libc::MAP_FAILED {
        return Err(last_code());
    }

    Ok(RawView {
        addr: addr as *mut u8,
        len,
        section: RawHandle::NONE,
    })
}

fn _munmap(view: &RawView) -> Result<(), i32> {
    // Safety: the vtable contract, `view` was returned by `_map` and is unmapped once.
    if -1 == unsafe { libc::munmap(view.addr as *mut c_void, view.len) } {
        return Err(last_code());
    }

    Ok(())
}

fn _msync(view: &RawView, _: RawHandle) -> Result<(), i32> {
    // Safety: the range is a live mapping.
    if -1 == unsafe { libc::msync(view.addr as *mut c_void, view.len, libc::MS_SYNC) } {
        return Err(last_code());
    }

    Ok(())
}

fn _madvise(view: &RawView, hint: CacheHint) -> Result<(), i32> {
    let advice = match hint {
        CacheHint::Normal => libc::MADV_NORMAL,
        CacheHint::SequentialScan => libc::MADV_SEQUENTIAL,
        CacheHint::RandomAccess => libc::MADV_RANDOM,
    };

    // Safety: advice does not change the contents of a shared file mapping.
    if -1 == unsafe { libc::madvise(view.addr as *mut c_void, view.len, advice) } {
        return Err(last_code());
    }

    Ok(())
}

fn _close(handle: RawHandle) -> Result<(), i32> {
    let fd = fd(handle)?;
    if -1 == unsafe { libc::close(fd) } {
        return Err(last_code());
    }

    Ok(())
}

fn _page_size() -> usize {
    // Safety: no preconditions.
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

#[test]
fn stat_agrees_with_fstat() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), b"Hello, world!").unwrap();

    let by_path = _stat(file.path()).unwrap();
    let handle = _open(file.path(), &OpenFlags { read: true, ..OpenFlags::default() }).unwrap();
    let by_handle = _fstat(handle).unwrap();
    _close(handle).unwrap();

    assert_eq!(by_path, by_handle);
    assert_eq!(by_path.size, 13);
}

#[test]
fn missing_file_is_enoent() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.bin");
    assert_eq!(_stat(&missing), Err(libc::ENOENT));
    assert_eq!(
        _open(&missing, &OpenFlags { read: true, ..OpenFlags::default() }),
        Err(libc::ENOENT)
    );
}

#[test]
fn writable_map_extends_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grown.bin");
    let flags = OpenFlags {
        read: true,
        write: true,
        create: true,
        hint: CacheHint::Normal,
    };

    let handle = _open(&path, &flags).unwrap();
    assert_eq!(_fstat(handle).unwrap().size, 0);

    let view = _map(
        handle,
        &MapRequest {
            offset: 0,
            len: 8192,
            protection: crate::Protection::ReadWrite,
            hint: CacheHint::Normal,
        },
    )
    .unwrap();

    assert_eq!(view.len, 8192);
    assert_eq!(_fstat(handle).unwrap().size, 8192);

    _munmap(&view).unwrap();
    _close(handle).unwrap();
}

#[test]
fn readonly_map_is_clamped() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), [7u8; 100]).unwrap();

    let handle = _open(file.path(), &OpenFlags { read: true, ..OpenFlags::default() }).unwrap();
    let view = _map(
        handle,
        &MapRequest {
            offset: 0,
            len: 4096,
            protection: crate::Protection::Read,
            hint: CacheHint::SequentialScan,
        },
    )
    .unwrap();

    assert_eq!(view.len, 100);
    _madvise(&view, CacheHint::SequentialScan).unwrap();
    _munmap(&view).unwrap();
    _close(handle).unwrap();
}
