//! Background prefetch loop of a [`BufferedFile`](crate::BufferedFile).
//!
//! Every iteration captures a [`Snapshot`] of the shared flags and the
//! source position, asks [`decide`] what to do, and carries it out. The
//! decision is a pure function so the priority order can be tested without
//! threads or I/O.

use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};

use crate::buffered::{BufferConfig, Shared, State};
use crate::core::{File, FsError};

/// What the worker does next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkerState {
    /// Shutdown was requested. Terminal.
    Stopped,
    /// Service a consumer's seek request.
    Seeking { to: u64 },
    /// Move a source that drifted away from the consumer's cursor back to it.
    Correcting { to: u64 },
    /// Fill the buffer from the source's current position.
    Prefetching { at: u64 },
    /// Nothing useful to do. With `poll` set, the source merely has no data
    /// ready yet and should be checked again after a short wait.
    Idle { poll: bool },
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Snapshot {
    pub(crate) stop: bool,
    pub(crate) seek: Option<u64>,
    pub(crate) idle: bool,
    pub(crate) read_error: bool,
    pub(crate) offset: u64,
    /// Consumer cursor is at end of stream or on buffered data.
    pub(crate) available: bool,
    pub(crate) source_offset: u64,
    pub(crate) source_ready: bool,
    pub(crate) source_eof: bool,
}

impl Snapshot {
    fn capture(shared: &Shared, state: &State, source: &dyn File) -> Self {
        Self {
            stop: shared.stop.is_cancelled(),
            seek: state.seek,
            idle: state.idle,
            read_error: state.read_error.is_some(),
            offset: state.offset,
            available: state.is_available(shared.size),
            source_offset: source.tell(),
            source_ready: source.is_available(),
            source_eof: source.eof(),
        }
    }
}

pub(crate) fn decide(s: &Snapshot) -> WorkerState {
    if s.stop {
        return WorkerState::Stopped;
    }

    if let Some(to) = s.seek {
        return WorkerState::Seeking { to };
    }

    let blocked = s.idle || s.read_error;

    // an earlier seek was served from the buffer, but the consumer has now
    // run out of buffered data while the source reads somewhere else
    if !blocked && s.source_offset != s.offset && !s.available {
        return WorkerState::Correcting { to: s.offset };
    }

    if !blocked && s.source_ready && !s.source_eof {
        return WorkerState::Prefetching {
            at: s.source_offset,
        };
    }

    WorkerState::Idle {
        poll: !blocked && !s.source_ready && !s.source_eof,
    }
}

pub(crate) fn run(shared: Arc<Shared>, mut source: Box<dyn File>, config: BufferConfig) {
    let mut scratch = vec![0u8; config.read_chunk.max(1)];
    let mut state = shared.state.lock();

    loop {
        let step = decide(&Snapshot::capture(&shared, &state, source.as_ref()));
        trace!(?step, "buffer worker step");

        match step {
            WorkerState::Stopped => break,

            WorkerState::Seeking { to } => {
                let result = MutexGuard::unlocked(&mut state, || source.seek(to));
                // a newer request may have replaced ours while unlocked
                let current = state.seek == Some(to);

                match result {
                    Ok(()) if current => {
                        // the next decision must not see the caller's old cursor
                        state.offset = to;
                    }
                    Ok(()) => {}
                    Err(err) => {
                        warn!(offset = to, error = %err, "source seek failed");
                        state.seek_error = Some((to, FsError::seek_failure(to, err)));
                    }
                }

                state.idle = false;
                if current {
                    state.seek = None;
                }
                shared.client_cond.notify_all();
            }

            WorkerState::Correcting { to } => {
                debug!(from = source.tell(), to, "moving source back to read position");
                let result = MutexGuard::unlocked(&mut state, || source.seek(to));
                if let Err(err) = result {
                    // surfaces through read(): the consumer never asked for this seek
                    warn!(offset = to, error = %err, "source reposition failed");
                    state.read_error = Some(FsError::read_failure(to, err));
                    shared.client_cond.notify_all();
                }
            }

            WorkerState::Prefetching { at } => {
                prefetch(&shared, &mut state, source.as_mut(), &mut scratch, at);
            }

            WorkerState::Idle { poll: true } => {
                shared
                    .wake_cond
                    .wait_for(&mut state, config.poll_interval);
            }

            WorkerState::Idle { poll: false } => {
                shared.wake_cond.wait(&mut state);
            }
        }
    }

    debug!("buffer worker stopped");
}

fn prefetch(
    shared: &Shared,
    state: &mut MutexGuard<'_, State>,
    source: &mut dyn File,
    scratch: &mut [u8],
    at: u64,
) {
    let span = state.buffer.writable_len(at);

    if span == 0 {
        if state.is_available(shared.size) {
            // enough for the next read; sleep until the consumer moves on
            trace!(at, "buffer full ahead of source, going idle");
            state.idle = true;
            return;
        }

        // not reached while decide() corrects a drifted source first
        let to = state.offset;
        debug!(from = at, to, "source inside buffered region, repositioning");
        let result = MutexGuard::unlocked(state, || source.seek(to));
        if let Err(err) = result {
            warn!(offset = to, error = %err, "source reposition failed");
            state.read_error = Some(FsError::read_failure(to, err));
            shared.client_cond.notify_all();
            notify_available(shared, state);
        }
        return;
    }

    let len = span.min(scratch.len());
    let result = MutexGuard::unlocked(state, || source.read(&mut scratch[..len]));

    match result {
        Ok(0) => {
            warn!(offset = at, "source ended before its reported size");
            state.read_error = Some(FsError::read_failure(
                at,
                FsError::Protocol("source returned no data before end of stream".into()),
            ));
        }
        Ok(n) => {
            state.buffer.write(at)[..n].copy_from_slice(&scratch[..n]);
            state.buffer.commit(at, at + n as u64);
            trace!(offset = at, bytes = n, "committed");
        }
        Err(err) => {
            warn!(offset = at, error = %err, "source read failed");
            state.read_error = Some(FsError::read_failure(at, err));
        }
    }

    shared.client_cond.notify_all();
    notify_available(shared, state);
}

fn notify_available(shared: &Shared, state: &mut MutexGuard<'_, State>) {
    if let Some(callback) = &shared.on_available {
        MutexGuard::unlocked(state, || callback());
    }
}
