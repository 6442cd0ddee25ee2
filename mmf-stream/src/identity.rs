//! Which physical file, opened which way.
use core::cmp::Ordering;
use std::path::Path;

use mmf_os::{FileStat, Os, OsError};

use crate::FileMode;

/// Device and serial number of a file, together with the mode it is opened in.
///
/// Two paths naming the same file (hard links, `..` components, symlinks) have the same identity.
/// The same file under another mode does not: those are mapped separately.
///
/// Ordered by serial, then mode, then device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId {
    device: u64,
    serial: u64,
    mode: FileMode,
}

impl FileId {
    pub fn new(stat: &FileStat, mode: FileMode) -> Self {
        FileId {
            device: stat.device,
            serial: stat.serial,
            mode,
        }
    }

    /// Derive the identity with one `stat` call.
    pub fn of_path(os: &Os, path: &Path, mode: FileMode) -> Result<Self, OsError> {
        os.stat(path).map(|stat| FileId::new(&stat, mode))
    }

    pub fn device(&self) -> u64 {
        self.device
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }
}

impl Ord for FileId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.serial, self.mode, self.device).cmp(&(other.serial, other.mode, other.device))
    }
}

impl PartialOrd for FileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[test]
fn ordering_is_serial_mode_device() {
    let id = |device, serial, mode| FileId::new(&FileStat { device, serial, size: 0 }, mode);

    // Serial dominates the device.
    assert!(id(9, 1, FileMode::Read) < id(1, 2, FileMode::Read));
    // Mode dominates the device.
    assert!(id(9, 1, FileMode::Read) < id(1, 1, FileMode::Write));
    // Device breaks ties.
    assert!(id(1, 1, FileMode::Append) < id(2, 1, FileMode::Append));

    assert_eq!(id(3, 4, FileMode::ReadWrite), id(3, 4, FileMode::ReadWrite));
    assert_ne!(id(3, 4, FileMode::ReadWrite), id(3, 4, FileMode::Read));

    let mut ids = vec![
        id(2, 1, FileMode::Read),
        id(1, 1, FileMode::Write),
        id(1, 1, FileMode::Read),
        id(0, 0, FileMode::Append),
    ];
    ids.sort();
    assert_eq!(
        ids,
        [
            id(0, 0, FileMode::Append),
            id(1, 1, FileMode::Read),
            id(2, 1, FileMode::Read),
            id(1, 1, FileMode::Write),
        ]
    );
}
