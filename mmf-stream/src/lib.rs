//! Streams over memory mapped files.
//!
//! A [`MappedStream`] reads and writes a file by copying bytes to and from a view of it mapped
//! into the address space, instead of going through buffered I/O. The [`MappedFilePool`] makes
//! sure a physical file opened the same way is mapped only once per pool: further opens share
//! the stream and count references, the last close unmaps it.
//!
//! ```no_run
//! use mmf_stream::{DataStream, FileMode, MappedFilePool};
//!
//! let pool = MappedFilePool::global();
//! let stream = pool.open_file("data.bin", FileMode::Read)?;
//! if stream.is_valid() {
//!     let mut head = [0; 16];
//!     let n = stream.read(&mut head);
//!     println!("{:?}", &head[..n]);
//! }
//! pool.close_file("data.bin", FileMode::Read)?;
//! # Ok::<_, mmf_stream::Error>(())
//! ```
//!
//! Opening never fails because the OS refused to open or map the file. Such a stream is returned
//! in an invalid state instead, check [`DataStream::is_valid`] before use.
#[cfg(test)]
mod tests;

mod error;
mod identity;
mod lines;
mod mapped;
mod mode;
mod pool;
mod stream;

pub use error::Error;
pub use identity::FileId;
pub use lines::LineReader;
pub use mapped::{MappedData, MappedStream};
pub use mode::FileMode;
pub use pool::{MappedFilePool, PoolOptions};
pub use stream::DataStream;

pub use mmf_os::{CacheHint, Os, OsError, OsErrorKind};

/// Parameters of a newly constructed stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// The initial view covers at least this many bytes, even if the file is smaller.
    ///
    /// Writable files are grown on disk to cover the view. Read-only views never extend past the
    /// data in the file.
    pub min_size: usize,
    pub hint: CacheHint,
}

impl StreamOptions {
    pub fn with_min_size(min_size: usize) -> Self {
        StreamOptions {
            min_size,
            ..StreamOptions::default()
        }
    }
}
