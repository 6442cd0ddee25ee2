//! The file-mapping family: `CreateFileMappingW` and `MapViewOfFile`.
use core::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_INVALID_PARAMETER, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FlushFileBuffers, GetFileInformationByHandle, BY_HANDLE_FILE_INFORMATION,
    FILE_ATTRIBUTE_NORMAL, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_RANDOM_ACCESS,
    FILE_FLAG_SEQUENTIAL_SCAN, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_ALWAYS,
    OPEN_EXISTING,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, FlushViewOfFile, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ,
    FILE_MAP_WRITE, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READONLY, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use crate::{CacheHint, FileStat, MapRequest, OpenFlags, OsVTable, Protection, RawHandle, RawView};

pub(crate) fn vtable() -> OsVTable {
    OsVTable {
        stat: _stat,
        open: _open,
        fstat: _fstat,
        map: _map,
        unmap: _unmap,
        flush: _flush,
        advise: _advise,
        close: _close,
        page_size: _page_size,
    }
}

fn last_error() -> i32 {
    unsafe { GetLastError() as i32 }
}

fn wide_path(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(Some(0)).collect()
}

fn split_u64(v: u64) -> (u32, u32) {
    ((v >> 32) as u32, v as u32)
}

fn _stat(path: &Path) -> Result<FileStat, i32> {
    let path = wide_path(path);
    // Zero access rights, we only query attributes. Backup semantics also allow directories.
    let handle = unsafe {
        CreateFileW(
            path.as_ptr(),
            0,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            core::ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            0 as HANDLE,
        )
    };

    if handle == INVALID_HANDLE_VALUE {
        return Err(last_error());
    }

    let stat = _fstat(RawHandle(handle as isize));
    unsafe { CloseHandle(handle) };
    stat
}

fn _fstat(handle: RawHandle) -> Result<FileStat, i32> {
    let mut info = core::mem::MaybeUninit::<BY_HANDLE_FILE_INFORMATION>::zeroed();
    if 0 == unsafe { GetFileInformationByHandle(handle.0 as HANDLE, info.as_mut_ptr()) } {
        return Err(last_error());
    }

    // Safety: initialized on success.
    let info = unsafe { info.assume_init_ref() };
    Ok(FileStat {
        device: u64::from(info.dwVolumeSerialNumber),
        serial: u64::from(info.nFileIndexHigh) << 32 | u64::from(info.nFileIndexLow),
        size: u64::from(info.nFileSizeHigh) << 32 | u64::from(info.nFileSizeLow),
    })
}

fn _open(path: &Path, flags: &OpenFlags) -> Result<RawHandle, i32> {
    let path = wide_path(path);

    let mut access = 0;
    if flags.read {
        access |= GENERIC_READ;
    }
    if flags.write {
        access |= GENERIC_WRITE;
    }

    let disposition = if flags.create { OPEN_ALWAYS } else { OPEN_EXISTING };

    // Windows only takes the access pattern when opening the file.
    let attributes = FILE_ATTRIBUTE_NORMAL
        | match flags.hint {
            CacheHint::Normal => 0,
            CacheHint::SequentialScan => FILE_FLAG_SEQUENTIAL_SCAN,
            CacheHint::RandomAccess => FILE_FLAG_RANDOM_ACCESS,
        };

    let handle = unsafe {
        CreateFileW(
            path.as_ptr(),
            access,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            core::ptr::null(),
            disposition,
            attributes,
            0 as HANDLE,
        )
    };

    if handle == INVALID_HANDLE_VALUE {
        return Err(last_error());
    }

    Ok(RawHandle(handle as isize))
}

fn _map(handle: RawHandle, request: &MapRequest) -> Result<RawView, i32> {
    let size = _fstat(handle)?.size;
    let end = request
        .offset
        .checked_add(request.len as u64)
        .ok_or(ERROR_INVALID_PARAMETER as i32)?;

    let (protect, access, len, maximum) = match request.protection {
        // A mapping object larger than the file grows the file, it is the writable case.
        Protection::Write => (PAGE_READWRITE, FILE_MAP_WRITE, request.len, end.max(size)),
        Protection::ReadWrite => (
            PAGE_READWRITE,
            FILE_MAP_READ | FILE_MAP_WRITE,
            request.len,
            end.max(size),
        ),
        Protection::Read => {
            let available = size.saturating_sub(request.offset);
            let len = request.len.min(usize::try_from(available).unwrap_or(usize::MAX));
            (PAGE_READONLY, FILE_MAP_READ, len, size)
        }
    };

    if len == 0 {
        return Err(ERROR_INVALID_PARAMETER as i32);
    }

    let (max_high, max_low) = split_u64(maximum);
    let section = unsafe {
        CreateFileMappingW(
            handle.0 as HANDLE,
            core::ptr::null(),
            protect,
            max_high,
            max_low,
            core::ptr::null(),
        )
    };

    if section == 0 {
        return Err(last_error());
    }

    let (off_high, off_low) = split_u64(request.offset);
    let addr = unsafe { MapViewOfFile(section, access, off_high, off_low, len) };

    if addr.Value.is_null() {
        let code = last_error();
        unsafe { CloseHandle(section) };
        return Err(code);
    }

    Ok(RawView {
        addr: addr.Value as *mut u8,
        len,
        section: RawHandle(section as isize),
    })
}

fn _unmap(view: &RawView) -> Result<(), i32> {
    let addr = MEMORY_MAPPED_VIEW_ADDRESS {
        Value: view.addr as *mut c_void,
    };

    // The view must go before its mapping object, both are attempted regardless.
    let unmapped = unsafe { UnmapViewOfFile(addr) };
    let unmap_error = if unmapped == 0 { Some(last_error()) } else { None };
    let closed = unsafe { CloseHandle(view.section.0 as HANDLE) };

    if let Some(code) = unmap_error {
        return Err(code);
    }

    if closed == 0 {
        return Err(last_error());
    }

    Ok(())
}

fn _flush(view: &RawView, file: RawHandle) -> Result<(), i32> {
    if 0 == unsafe { FlushViewOfFile(view.addr as *const c_void, view.len) } {
        return Err(last_error());
    }

    // FlushViewOfFile is asynchronous for the file metadata, wait for the disk as well.
    if file != RawHandle::NONE && 0 == unsafe { FlushFileBuffers(file.0 as HANDLE) } {
        return Err(last_error());
    }

    Ok(())
}

fn _advise(_: &RawView, _: CacheHint) -> Result<(), i32> {
    // Applied by `_open` through the file flags.
    Ok(())
}

fn _close(handle: RawHandle) -> Result<(), i32> {
    if 0 == unsafe { CloseHandle(handle.0 as HANDLE) } {
        return Err(last_error());
    }

    Ok(())
}

fn _page_size() -> usize {
    let mut info = core::mem::MaybeUninit::<SYSTEM_INFO>::zeroed();
    unsafe { GetSystemInfo(info.as_mut_ptr()) };
    // Views start at multiples of the allocation granularity, not the page size.
    let info = unsafe { info.assume_init() };
    info.dwAllocationGranularity as usize
}
