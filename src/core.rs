use std::io::{self, SeekFrom};

use thiserror::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File is closed")]
    FileClosed,

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// The underlying source could not be repositioned for a caller's seek.
    #[error("Seek to {offset} failed: {source}")]
    Seek {
        offset: u64,
        #[source]
        source: Box<FsError>,
    },

    /// The underlying source failed while filling data needed by a read.
    #[error("Read at {offset} failed: {source}")]
    Read {
        offset: u64,
        #[source]
        source: Box<FsError>,
    },

    #[error("Stream was shut down")]
    Shutdown,

    #[error("Stream cannot be buffered: {0}")]
    NotBufferable(String),
}

impl FsError {
    pub(crate) fn seek_failure(offset: u64, source: FsError) -> Self {
        FsError::Seek {
            offset,
            source: Box::new(source),
        }
    }

    pub(crate) fn read_failure(offset: u64, source: FsError) -> Self {
        FsError::Read {
            offset,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Abstract file interface
pub trait File: Send {
    /// Read up to buf.len() bytes into buf.
    /// Returns number of bytes read (0 = EOF).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seek to absolute position.
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Get current position.
    fn tell(&self) -> u64;

    /// Check if the read cursor is at end of file.
    fn eof(&self) -> bool;

    /// Get file size if available.
    /// Returns None for streams, pipes, or chunked responses.
    fn size(&self) -> Option<u64> {
        None
    }

    /// Whether the next read can complete without waiting.
    ///
    /// Purely blocking sources always say yes; a source that fills in the
    /// background should answer without blocking.
    fn is_available(&self) -> bool {
        true
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn mime_type(&self) -> Option<String> {
        None
    }

    /// Close the file (optional, called automatically on drop).
    fn close(&mut self) {}
}

pub trait FileSystem: Send + Sync {
    fn open(&self, path: &str, mode: &str) -> Result<Box<dyn File>>;
}

/// Create a filesystem for the given URL.
pub fn create(url: &str) -> Result<Box<dyn FileSystem>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Box::new(crate::http::HttpFileSystem::new()))
    } else {
        Err(FsError::UnsupportedProtocol(url.to_string()))
    }
}

/// Open a file directly.
pub fn open(url: &str, mode: &str) -> Result<Box<dyn File>> {
    let fs = create(url)?;
    fs.open(url, mode)
}

/// Turn a `SeekFrom` into an absolute position.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, size: Option<u64>) -> io::Result<u64> {
    let (base, delta) = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::Current(delta) => (current, delta),
        SeekFrom::End(delta) => {
            let size = size.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::Unsupported,
                    "Cannot seek from end without known file size",
                )
            })?;
            (size, delta)
        }
    };

    Ok(if delta >= 0 {
        base.saturating_add(delta as u64)
    } else {
        base.saturating_sub(delta.unsigned_abs())
    })
}
