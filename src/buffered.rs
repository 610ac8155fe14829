//! Read-ahead façade over a slow seekable source.
//!
//! [`BufferedFile`] owns a background worker that copies the underlying
//! source into a [`SparseBuffer`] sized to the whole stream. Reads are served
//! from the buffer; seeks into already buffered data never reach the source.
//!
//! All shared fields live behind one mutex. Consumers wait on `client_cond`,
//! the worker waits on `wake_cond`.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::core::{File, FsError, Result, resolve_seek};
use crate::sparse::SparseBuffer;
use crate::worker;

/// Invoked from the worker thread whenever new data (or a read error) is ready.
pub type AvailableCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Upper bound for a single read from the underlying source.
    pub read_chunk: usize,
    /// How long the worker sleeps before re-checking a source that had no
    /// data ready.
    pub poll_interval: Duration,
    pub thread_name: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read_chunk: 64 * 1024,
            poll_interval: Duration::from_millis(10),
            thread_name: "input_buffered".into(),
        }
    }
}

pub(crate) struct State {
    pub(crate) buffer: SparseBuffer,
    pub(crate) offset: u64,
    pub(crate) seek: Option<u64>,
    pub(crate) idle: bool,
    /// Failed seek, tagged with the target it was requested for.
    pub(crate) seek_error: Option<(u64, FsError)>,
    pub(crate) read_error: Option<FsError>,
}

impl State {
    pub(crate) fn is_available(&self, size: u64) -> bool {
        self.offset == size || self.buffer.has_data(self.offset)
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    pub(crate) client_cond: Condvar,
    pub(crate) wake_cond: Condvar,
    pub(crate) stop: CancellationToken,
    pub(crate) size: u64,
    pub(crate) on_available: Option<AvailableCallback>,
}

impl Shared {
    fn request_stop(&self) {
        let _state = self.state.lock();
        self.stop.cancel();
        self.wake_cond.notify_all();
        self.client_cond.notify_all();
    }
}

/// Requests shutdown of a [`BufferedFile`] from another thread.
///
/// Blocked `read`/`seek` calls return [`FsError::Shutdown`]. The worker is
/// joined later by [`BufferedFile::close`] or on drop.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shared.request_stop();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.stop.is_cancelled()
    }
}

pub struct BufferedFileBuilder {
    source: Box<dyn File>,
    config: BufferConfig,
    on_available: Option<AvailableCallback>,
}

impl BufferedFileBuilder {
    pub fn config(mut self, config: BufferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn read_chunk(mut self, read_chunk: usize) -> Self {
        self.config.read_chunk = read_chunk.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    pub fn on_available<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_available = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Result<BufferedFile> {
        BufferedFile::spawn(self.source, self.config, self.on_available)
    }
}

pub struct BufferedFile {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    mime_type: Option<String>,
}

impl BufferedFile {
    /// Wrap `source` with the default configuration and start prefetching.
    pub fn new(source: Box<dyn File>) -> Result<Self> {
        Self::builder(source).build()
    }

    pub fn builder(source: Box<dyn File>) -> BufferedFileBuilder {
        BufferedFileBuilder {
            source,
            config: BufferConfig::default(),
            on_available: None,
        }
    }

    /// Whether `source` has a known size, supports seeking and fits in memory.
    pub fn is_eligible(source: &dyn File) -> bool {
        Self::capacity_for(source).is_ok()
    }

    fn capacity_for(source: &dyn File) -> Result<usize> {
        if !source.is_seekable() {
            return Err(FsError::NotBufferable("source is not seekable".into()));
        }

        let size = source
            .size()
            .ok_or_else(|| FsError::NotBufferable("source size is unknown".into()))?;

        usize::try_from(size)
            .map_err(|_| FsError::NotBufferable(format!("{size} bytes do not fit in memory")))
    }

    fn spawn(
        source: Box<dyn File>,
        config: BufferConfig,
        on_available: Option<AvailableCallback>,
    ) -> Result<Self> {
        let capacity = Self::capacity_for(source.as_ref())?;
        let size = capacity as u64;
        let offset = source.tell().min(size);
        let mime_type = source.mime_type();

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                buffer: SparseBuffer::new(capacity),
                offset,
                seek: None,
                idle: false,
                seek_error: None,
                read_error: None,
            }),
            client_cond: Condvar::new(),
            wake_cond: Condvar::new(),
            stop: CancellationToken::new(),
            size,
            on_available,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker::run(worker_shared, source, config))?;

        debug!(size, offset, "buffered stream started");

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            mime_type,
        })
    }

    /// Copy buffered bytes at the cursor into `buf`, waiting for the worker if
    /// none are there yet. Short reads are normal; `Ok(0)` means end of stream.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let shared = &*self.shared;
        let mut state = shared.state.lock();

        loop {
            if shared.stop.is_cancelled() {
                return Err(FsError::Shutdown);
            }

            if state.offset >= shared.size {
                return Ok(0);
            }

            let offset = state.offset;
            let copied = state.buffer.read(offset).map(|data| {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                n
            });

            if let Some(n) = copied {
                state.offset += n as u64;

                if !state.is_available(shared.size) {
                    // the worker may be asleep; the next read needs more data
                    state.idle = false;
                    shared.wake_cond.notify_one();
                }

                return Ok(n);
            }

            if let Some(err) = state.read_error.take() {
                shared.wake_cond.notify_one();
                return Err(err);
            }

            if state.idle {
                state.idle = false;
                shared.wake_cond.notify_one();
            }

            shared.client_cond.wait(&mut state);
        }
    }

    /// Move the cursor. Buffered targets are served immediately; anything else
    /// waits until the worker has repositioned the source.
    pub fn seek(&self, pos: u64) -> Result<()> {
        let shared = &*self.shared;
        let mut state = shared.state.lock();

        if shared.stop.is_cancelled() {
            return Err(FsError::Shutdown);
        }

        if pos >= shared.size {
            state.offset = shared.size;
            return Ok(());
        }

        if state.buffer.has_data(pos) {
            trace!(pos, "seek within buffered data");
            state.offset = pos;
            return Ok(());
        }

        debug!(pos, "seek needs source reposition");
        state.seek = Some(pos);
        shared.wake_cond.notify_one();

        while state.seek.is_some() && !shared.stop.is_cancelled() {
            shared.client_cond.wait(&mut state);
        }

        if shared.stop.is_cancelled() {
            return Err(FsError::Shutdown);
        }

        // a superseded request may have left its own failure behind
        if let Some((_, err)) = state.seek_error.take_if(|(at, _)| *at == pos) {
            return Err(err);
        }

        state.offset = pos;
        Ok(())
    }

    /// True when a read would not block: at end of stream or on buffered data.
    pub fn is_available(&self) -> bool {
        self.shared.state.lock().is_available(self.shared.size)
    }

    pub fn eof(&self) -> bool {
        self.tell() == self.shared.size
    }

    pub fn tell(&self) -> u64 {
        self.shared.state.lock().offset
    }

    pub fn size(&self) -> u64 {
        self.shared.size
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn buffered_ranges(&self) -> Vec<Range<u64>> {
        self.shared.state.lock().buffer.filled_ranges()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the worker and wait for it. Pending and later calls fail with
    /// [`FsError::Shutdown`].
    pub fn close(&self) {
        self.shared.request_stop();

        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        // the last reference can be dropped by a callback on the worker itself
        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            warn!("buffer worker panicked");
        }
        debug!("buffered stream closed");
    }
}

impl File for BufferedFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        BufferedFile::read(self, buf)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        BufferedFile::seek(self, pos)
    }

    fn tell(&self) -> u64 {
        BufferedFile::tell(self)
    }

    fn eof(&self) -> bool {
        BufferedFile::eof(self)
    }

    fn size(&self) -> Option<u64> {
        Some(self.shared.size)
    }

    fn is_available(&self) -> bool {
        BufferedFile::is_available(self)
    }

    fn mime_type(&self) -> Option<String> {
        self.mime_type.clone()
    }

    fn close(&mut self) {
        BufferedFile::close(self);
    }
}

impl Read for BufferedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        BufferedFile::read(self, buf).map_err(io::Error::other)
    }
}

impl Seek for BufferedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = resolve_seek(pos, self.tell(), Some(self.shared.size))?;
        BufferedFile::seek(self, new_pos).map_err(io::Error::other)?;
        Ok(self.tell())
    }
}

impl std::fmt::Debug for BufferedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedFile")
            .field("size", &self.shared.size)
            .field("mime_type", &self.mime_type)
            .field("stopped", &self.shared.stop.is_cancelled())
            .finish()
    }
}

impl Drop for BufferedFile {
    fn drop(&mut self) {
        self.close();
    }
}
