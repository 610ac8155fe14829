//! # Agrim
//!
//! Agrim (अग्रिम - "in advance" in Sanskrit) puts a read-ahead buffer in front of a slow
//! seekable stream, such as a file behind HTTP Range requests. A background thread keeps
//! fetching the stream into memory while you read it, so sequential reads rarely wait on
//! the network and seeking back into data you already have is instant.
//!
//! ## Basic usage
//!
//! ```no_run
//! use agrim::{open, File};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut file = open("https://example.com/track.flac", "r")?;
//!
//! let mut buffer = vec![0u8; 4096];
//! let bytes_read = file.read(&mut buffer)?;
//!
//! // instant if the first 1000 bytes are already buffered
//! file.seek(1000)?;
//!
//! if file.is_available() {
//!     println!("next read will not block");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Buffering any source
//!
//! Anything implementing [`File`] with a known size can be wrapped:
//!
//! ```no_run
//! use agrim::{BufferedFile, File};
//! # fn source() -> Box<dyn File> { unimplemented!() }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = BufferedFile::builder(source())
//!     .read_chunk(128 * 1024)
//!     .on_available(|| println!("more data arrived"))
//!     .build()?;
//!
//! let mut buf = [0u8; 512];
//! let n = file.read(&mut buf)?;
//! # Ok(())
//! # }
//! ```
//!
//! `BufferedFile` methods take `&self`, so one file can be shared between threads behind an
//! `Arc`. A [`ShutdownHandle`] stops it from another thread; blocked reads and seeks then
//! fail with [`FsError::Shutdown`].
//!
//! ## How it works
//!
//! The buffer is allocated once at the full size of the stream, which is why the size has
//! to be known. A single worker thread owns the underlying source. It:
//! - services seek requests first, so a seek never waits behind prefetching
//! - moves the source back to your read position when an earlier in-buffer seek left it
//!   reading somewhere that no longer helps
//! - otherwise keeps reading from wherever the source is and fills the gaps
//! - goes idle when everything ahead of you is already buffered
//!
//! Seeking to an offset that is already buffered only moves the cursor. Seeking anywhere
//! else waits until the worker has repositioned the source.
//!
//! ## Using with standard I/O libraries
//!
//! `open()` returns `Box<dyn File>`. To use it with libraries that want `std::io::Read`
//! and `Seek`, wrap it in `FileAdapter`:
//!
//! ```no_run
//! use agrim::{open, FileAdapter};
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut file = FileAdapter::new(open("https://example.com/notes.txt", "r")?);
//! let mut text = String::new();
//! file.read_to_string(&mut text)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Tuning the behavior
//!
//! ```no_run
//! use agrim::{BufferConfig, FileSystem, HttpFileSystem};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fs = HttpFileSystem::builder()
//!     .chunk_size(512 * 1024)                  // bytes per range request
//!     .buffer_max_bytes(256 * 1024 * 1024)     // bigger files are opened unbuffered
//!     .retry_max_attempts(5)
//!     .connect_timeout(Duration::from_secs(10))
//!     .buffer_config(BufferConfig {
//!         read_chunk: 256 * 1024,
//!         ..BufferConfig::default()
//!     })
//!     .build();
//!
//! let file = fs.open("https://example.com/large-file.bin", "r")?;
//! # Ok(())
//! # }
//! ```
//!
//! Files whose size the server does not report are opened without the buffer.
//!
//! ## Errors
//!
//! - Network / Protocol / IO errors come from the HTTP source itself
//! - `Seek` is returned by `seek` when the worker could not reposition the source
//! - `Read` is returned by `read` when the worker failed to fetch the data you need; it is
//!   reported once, and the next `read` tries again
//! - `Shutdown` means the file was closed while you were using it
//! - `NotBufferable` means the source has no known size or cannot seek
//!
//! ## Logging
//!
//! Uses `tracing`. Install a subscriber to see worker decisions, range requests and
//! retries.
//!
//! ## Feature flags
//!
//! - `curl` (default): use libcurl for HTTP
//! - `reqwest`: use reqwest instead of curl (don't enable both)
//! - `capi`: build the C API

pub mod buffered;
pub mod core;
pub mod http;
pub mod plug;
pub mod sparse;
mod worker;

pub use crate::buffered::*;
pub use crate::core::*;
pub use crate::http::*;
pub use crate::plug::*;
pub use crate::sparse::SparseBuffer;

#[cfg(feature = "capi")]
pub mod ffi;

use std::io::{self, Read, Seek, SeekFrom};

pub struct FileAdapter {
    inner: Box<dyn File>,
}

impl FileAdapter {
    pub fn new(file: Box<dyn File>) -> Self {
        Self { inner: file }
    }

    pub fn into_inner(self) -> Box<dyn File> {
        self.inner
    }
}

impl From<Box<dyn File>> for FileAdapter {
    fn from(file: Box<dyn File>) -> Self {
        Self::new(file)
    }
}

impl Read for FileAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(io::Error::other)
    }
}

impl Seek for FileAdapter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = resolve_seek(pos, self.inner.tell(), self.inner.size())?;
        self.inner.seek(new_pos).map_err(io::Error::other)?;
        Ok(self.inner.tell())
    }
}
