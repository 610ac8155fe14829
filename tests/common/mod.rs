#![allow(dead_code)]

//! In-memory scripted source for driving a `BufferedFile` in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use agrim::{BufferedFile, File, FsError, Result};
use parking_lot::{Condvar, Mutex};

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// Counters and knobs shared between a test and its [`ScriptedSource`].
pub struct Control {
    seeks: AtomicUsize,
    reads: AtomicUsize,
    fail_seeks: AtomicUsize,
    fail_reads: AtomicUsize,
    available_until: AtomicU64,
    /// `None` lets every read through; `Some(n)` allows `n` more reads.
    permits: Mutex<Option<usize>>,
    permits_cond: Condvar,
    seeks_held: Mutex<bool>,
    seeks_cond: Condvar,
}

impl Control {
    fn new() -> Self {
        Self {
            seeks: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            fail_seeks: AtomicUsize::new(0),
            fail_reads: AtomicUsize::new(0),
            available_until: AtomicU64::new(u64::MAX),
            permits: Mutex::new(None),
            permits_cond: Condvar::new(),
            seeks_held: Mutex::new(false),
            seeks_cond: Condvar::new(),
        }
    }

    pub fn seeks(&self) -> usize {
        self.seeks.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_next_seeks(&self, n: usize) {
        self.fail_seeks.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// The source reports no ready data at or after `offset`.
    pub fn set_available_until(&self, offset: u64) {
        self.available_until.store(offset, Ordering::SeqCst);
    }

    pub fn make_available(&self) {
        self.set_available_until(u64::MAX);
    }

    /// Block every source read until [`allow_reads`](Self::allow_reads) or
    /// [`release_reads`](Self::release_reads).
    pub fn hold_reads(&self) {
        *self.permits.lock() = Some(0);
    }

    pub fn allow_reads(&self, n: usize) {
        let mut permits = self.permits.lock();
        if let Some(left) = permits.as_mut() {
            *left += n;
        }
        self.permits_cond.notify_all();
    }

    pub fn release_reads(&self) {
        *self.permits.lock() = None;
        self.permits_cond.notify_all();
    }

    /// Park every source seek (after counting it) until
    /// [`release_seeks`](Self::release_seeks).
    pub fn hold_seeks(&self) {
        *self.seeks_held.lock() = true;
    }

    pub fn release_seeks(&self) {
        *self.seeks_held.lock() = false;
        self.seeks_cond.notify_all();
    }

    fn pass_seek_gate(&self) {
        let mut held = self.seeks_held.lock();
        while *held {
            self.seeks_cond.wait(&mut held);
        }
    }

    fn take_permit(&self) {
        let mut permits = self.permits.lock();
        while *permits == Some(0) {
            self.permits_cond.wait(&mut permits);
        }
        if let Some(left) = permits.as_mut() {
            *left -= 1;
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct ScriptedSource {
    data: Vec<u8>,
    size: Option<u64>,
    pos: u64,
    max_read: usize,
    ctl: Arc<Control>,
}

impl ScriptedSource {
    pub fn new(data: Vec<u8>) -> (Self, Arc<Control>) {
        let ctl = Arc::new(Control::new());
        let source = Self {
            size: Some(data.len() as u64),
            data,
            pos: 0,
            max_read: usize::MAX,
            ctl: Arc::clone(&ctl),
        };
        (source, ctl)
    }

    /// Cap the bytes returned by a single read.
    pub fn max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read;
        self
    }

    pub fn reported_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn starting_at(mut self, pos: u64) -> Self {
        self.pos = pos;
        self
    }

    pub fn boxed(self) -> Box<dyn File> {
        Box::new(self)
    }
}

impl File for ScriptedSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ctl.take_permit();
        self.ctl.reads.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.ctl.fail_reads) {
            return Err(FsError::Network("injected read failure".into()));
        }

        let start = (self.pos as usize).min(self.data.len());
        let n = buf.len().min(self.max_read).min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.ctl.seeks.fetch_add(1, Ordering::SeqCst);
        self.ctl.pass_seek_gate();

        if take_one(&self.ctl.fail_seeks) {
            return Err(FsError::Network("injected seek failure".into()));
        }

        self.pos = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn eof(&self) -> bool {
        self.pos >= self.size.unwrap_or(self.data.len() as u64)
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn is_available(&self) -> bool {
        self.pos < self.ctl.available_until.load(Ordering::SeqCst)
    }

    fn mime_type(&self) -> Option<String> {
        Some("application/octet-stream".into())
    }
}

/// Poll `cond` until it holds; panics after two seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Read until end of stream with `chunk`-sized calls.
pub fn read_to_end(file: &BufferedFile, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let n = file.read(&mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}
