use std::cell::OnceCell;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::buffered::{BufferConfig, BufferedFile};
use crate::core::{File, FileSystem, FsError, Result, resolve_seek};
use crate::plug::{BlockingHttp, HttpHead, build_default_transport};

fn empty_bytes() -> Arc<[u8]> {
    static EMPTY: OnceLock<Arc<[u8]>> = OnceLock::new();
    EMPTY.get_or_init(|| Arc::from(&[][..])).clone()
}

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub chunk_size: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub idle_timeout: Duration,
    /// Put opened files behind a read-ahead [`BufferedFile`] when possible.
    pub buffered: bool,
    /// Larger files are opened unbuffered.
    pub buffer_max_bytes: u64,
    pub buffer: BufferConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            buffered: true,
            buffer_max_bytes: 512 * 1024 * 1024,
            buffer: BufferConfig::default(),
        }
    }
}

fn retry_delay(base: Duration, max: Duration, attempt: usize) -> Duration {
    let shift = attempt.min(20);
    let mult = 1u32.checked_shl(shift as u32).unwrap_or(u32::MAX);
    let delay = base.checked_mul(mult).unwrap_or(max);
    if delay > max { max } else { delay }
}

struct RangeBuffer {
    data: Arc<[u8]>,
    buffer_start: u64,
    buffer_end: u64,
}

impl RangeBuffer {
    fn new() -> Self {
        Self {
            data: empty_bytes(),
            buffer_start: 0,
            buffer_end: 0,
        }
    }

    fn set_data(&mut self, data: Arc<[u8]>, file_start: u64) {
        self.buffer_end = file_start + data.len() as u64;
        self.buffer_start = file_start;
        self.data = data;
    }

    fn contains(&self, file_offset: u64) -> bool {
        file_offset >= self.buffer_start && file_offset < self.buffer_end
    }

    fn read(&self, out: &mut [u8], file_offset: u64) -> usize {
        if !self.contains(file_offset) {
            return 0;
        }

        let buffer_offset = (file_offset - self.buffer_start) as usize;
        let available = self.data.len() - buffer_offset;
        let to_copy = available.min(out.len());

        out[..to_copy].copy_from_slice(&self.data[buffer_offset..buffer_offset + to_copy]);
        to_copy
    }

    fn clear(&mut self) {
        self.data = empty_bytes();
        self.buffer_start = 0;
        self.buffer_end = 0;
    }
}

/// A remote file read through HTTP Range requests, one chunk at a time.
///
/// Every read that leaves the current chunk blocks on the network, which is
/// what [`BufferedFile`] is for.
pub struct HttpFile {
    url: Arc<str>,
    transport: Arc<dyn BlockingHttp>,
    config: HttpConfig,
    buffer: RangeBuffer,
    file_offset: u64,
    eof_reached: bool,
    closed: bool,
    head: OnceCell<HttpHead>,
}

impl HttpFile {
    const MAX_REFILL_ATTEMPTS: usize = 3;

    fn new(url: Arc<str>, transport: Arc<dyn BlockingHttp>, config: HttpConfig) -> Self {
        Self {
            url,
            transport,
            config,
            buffer: RangeBuffer::new(),
            file_offset: 0,
            eof_reached: false,
            closed: false,
            head: OnceCell::new(),
        }
    }

    fn with_retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(FsError::Network(err)) => {
                    if attempt >= self.config.retry_max_attempts {
                        return Err(FsError::Network(err));
                    }
                    debug!(url = %self.url, attempt, error = %err, "{what} failed, retrying");
                }
                Err(e) => return Err(e),
            }

            thread::sleep(retry_delay(
                self.config.retry_base_delay,
                self.config.retry_max_delay,
                attempt,
            ));
            attempt += 1;
        }
    }

    fn head(&self) -> &HttpHead {
        self.head.get_or_init(|| {
            self.with_retry("HEAD", || self.transport.head(&self.url))
                .unwrap_or_else(|err| {
                    warn!(url = %self.url, error = %err, "HEAD request failed");
                    HttpHead::default()
                })
        })
    }

    fn refill_buffer(&mut self) -> Result<()> {
        let range_start = self.file_offset;
        let range_end = range_start.saturating_add(self.config.chunk_size.saturating_sub(1));
        let expected_size = range_end - range_start + 1;
        let file_size = self.head().content_length;

        if file_size.is_some_and(|size| range_start >= size) {
            self.eof_reached = true;
            self.buffer.clear();
            return Ok(());
        }

        let response = self.with_retry("range request", || {
            self.transport.get_range(&self.url, range_start, range_end)
        })?;

        if response.data.is_empty() {
            self.eof_reached = true;
            self.buffer.clear();
            return Ok(());
        }

        let actual_size = response.data.len() as u64;
        self.eof_reached = match file_size {
            Some(size) => range_start + actual_size >= size,
            None => actual_size < expected_size,
        };

        debug!(url = %self.url, start = range_start, bytes = actual_size, "fetched range");
        self.buffer.set_data(response.data.into(), range_start);
        Ok(())
    }
}

impl File for HttpFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.closed {
            return Err(FsError::FileClosed);
        }

        let mut total_read = 0;
        let mut refill_attempts = 0;

        while total_read < buf.len() {
            if !self.buffer.contains(self.file_offset) {
                if self.eof_reached {
                    break;
                }

                self.refill_buffer()?;
                refill_attempts += 1;

                if refill_attempts > Self::MAX_REFILL_ATTEMPTS {
                    return Err(FsError::Protocol(
                        "Too many refill attempts without progress".into(),
                    ));
                }

                continue;
            }

            refill_attempts = 0;
            let bytes_read = self.buffer.read(&mut buf[total_read..], self.file_offset);
            total_read += bytes_read;
            self.file_offset += bytes_read as u64;
        }

        Ok(total_read)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if self.closed {
            return Err(FsError::FileClosed);
        }

        if !self.buffer.contains(pos) {
            self.buffer.clear();
            self.eof_reached = false;
        }

        self.file_offset = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.file_offset
    }

    fn eof(&self) -> bool {
        match self.size() {
            Some(size) => self.file_offset >= size,
            None => self.eof_reached && !self.buffer.contains(self.file_offset),
        }
    }

    fn size(&self) -> Option<u64> {
        if self.closed {
            return None;
        }

        self.head().content_length
    }

    fn mime_type(&self) -> Option<String> {
        self.head().content_type.clone()
    }

    fn close(&mut self) {
        if !self.closed {
            self.buffer.clear();
            self.closed = true;
        }
    }
}

impl Read for HttpFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        File::read(self, buf).map_err(io::Error::other)
    }
}

impl Seek for HttpFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = resolve_seek(pos, self.file_offset, File::size(self))?;
        File::seek(self, new_pos).map_err(io::Error::other)?;
        Ok(new_pos)
    }
}

impl Drop for HttpFile {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct HttpFileSystem {
    transport: Arc<dyn BlockingHttp>,
    config: HttpConfig,
}

pub struct HttpFileSystemBuilder {
    config: HttpConfig,
    transport: Option<Arc<dyn BlockingHttp>>,
}

impl Default for HttpFileSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFileSystemBuilder {
    pub fn new() -> Self {
        Self {
            config: HttpConfig::default(),
            transport: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn BlockingHttp>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.config.chunk_size = chunk_size.max(1);
        self
    }

    pub fn retry_max_attempts(mut self, attempts: usize) -> Self {
        self.config.retry_max_attempts = attempts;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn buffered(mut self, enabled: bool) -> Self {
        self.config.buffered = enabled;
        self
    }

    pub fn buffer_max_bytes(mut self, max_bytes: u64) -> Self {
        self.config.buffer_max_bytes = max_bytes;
        self
    }

    pub fn buffer_config(mut self, config: BufferConfig) -> Self {
        self.config.buffer = config;
        self
    }

    pub fn build(self) -> HttpFileSystem {
        let transport = self
            .transport
            .unwrap_or_else(|| build_default_transport(&self.config));

        HttpFileSystem {
            transport,
            config: self.config,
        }
    }
}

impl HttpFileSystem {
    pub fn new() -> Self {
        HttpFileSystemBuilder::new().build()
    }

    pub fn builder() -> HttpFileSystemBuilder {
        HttpFileSystemBuilder::new()
    }

    fn wants_buffer(&self, file: &HttpFile) -> bool {
        if !self.config.buffered {
            return false;
        }

        match File::size(file) {
            Some(size) if size <= self.config.buffer_max_bytes => BufferedFile::is_eligible(file),
            Some(size) => {
                debug!(url = %file.url, size, "too large to buffer, opening unbuffered");
                false
            }
            None => {
                debug!(url = %file.url, "size unknown, opening unbuffered");
                false
            }
        }
    }
}

impl Default for HttpFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for HttpFileSystem {
    fn open(&self, url: &str, mode: &str) -> Result<Box<dyn File>> {
        if mode != "r" && mode != "rb" {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Only read mode ('r' or 'rb') is supported",
            )));
        }

        let file = HttpFile::new(
            Arc::from(url),
            Arc::clone(&self.transport),
            self.config.clone(),
        );

        if !self.wants_buffer(&file) {
            return Ok(Box::new(file));
        }

        let buffered = BufferedFile::builder(Box::new(file))
            .config(self.config.buffer.clone())
            .build()?;
        Ok(Box::new(buffered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plug::HttpResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticTransport {
        body: Vec<u8>,
        range_requests: AtomicUsize,
    }

    impl StaticTransport {
        fn new(len: usize) -> Arc<Self> {
            Arc::new(Self {
                body: (0..len).map(|i| (i % 251) as u8).collect(),
                range_requests: AtomicUsize::new(0),
            })
        }
    }

    impl BlockingHttp for StaticTransport {
        fn head(&self, _url: &str) -> Result<HttpHead> {
            Ok(HttpHead {
                content_length: Some(self.body.len() as u64),
                content_type: Some("audio/mpeg".into()),
            })
        }

        fn get_range(&self, _url: &str, start: u64, end: u64) -> Result<HttpResponse> {
            self.range_requests.fetch_add(1, Ordering::SeqCst);
            let len = self.body.len() as u64;
            if start >= len {
                return Ok(HttpResponse::new(Vec::new(), 416, None, None));
            }
            let end = end.min(len - 1);
            let data = self.body[start as usize..=end as usize].to_vec();
            Ok(HttpResponse::new(data, 206, None, Some((start, end))))
        }
    }

    fn fs(transport: Arc<StaticTransport>, buffered: bool) -> HttpFileSystem {
        HttpFileSystem::builder()
            .transport(transport)
            .chunk_size(100)
            .buffered(buffered)
            .build()
    }

    #[test]
    fn reads_across_chunks_until_eof() {
        let transport = StaticTransport::new(250);
        let mut file = fs(transport.clone(), false).open("http://host/a", "r").unwrap();

        let mut out = vec![0u8; 400];
        let n = file.read(&mut out).unwrap();
        assert_eq!(n, 250);
        assert_eq!(&out[..n], &transport.body[..]);
        assert!(file.eof());
        assert_eq!(file.read(&mut out).unwrap(), 0);
        assert_eq!(transport.range_requests.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn eof_only_once_cursor_reaches_end() {
        let transport = StaticTransport::new(150);
        let mut file = fs(transport, false).open("http://host/a", "r").unwrap();

        let mut out = vec![0u8; 120];
        file.read(&mut out).unwrap();
        // the final chunk is already fetched but not consumed
        assert!(!file.eof());
        assert_eq!(file.read(&mut out).unwrap(), 30);
        assert!(file.eof());
    }

    #[test]
    fn seek_outside_chunk_refetches() {
        let transport = StaticTransport::new(300);
        let mut file = fs(transport.clone(), false).open("http://host/a", "r").unwrap();

        file.seek(210).unwrap();
        let mut out = [0u8; 5];
        assert_eq!(file.read(&mut out).unwrap(), 5);
        assert_eq!(&out[..], &transport.body[210..215]);
        assert_eq!(file.tell(), 215);
    }

    #[test]
    fn head_supplies_size_and_mime_type() {
        let file = fs(StaticTransport::new(10), false)
            .open("http://host/a", "r")
            .unwrap();
        assert_eq!(file.size(), Some(10));
        assert_eq!(file.mime_type().as_deref(), Some("audio/mpeg"));
    }

    #[test]
    fn buffered_open_reads_whole_body() {
        let transport = StaticTransport::new(1000);
        let mut file = fs(transport.clone(), true).open("http://host/a", "r").unwrap();

        let mut out = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let n = file.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, transport.body);
        assert!(file.is_available());
    }

    #[test]
    fn rejects_write_mode() {
        let err = fs(StaticTransport::new(1), false)
            .open("http://host/a", "w")
            .err()
            .unwrap();
        assert!(matches!(err, FsError::Io(_)));
    }
}
