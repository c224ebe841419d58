//! Bounded capture of process output
//!
//! A [`CaptureBuffer`] sits between a child's stdout reader thread and the
//! request that streams the output back. The writer side never blocks and
//! never fails; once the configured ceiling is crossed the buffer switches
//! to discarding mode for good and later bytes are dropped on the floor.
//! The reader side drains whatever accumulated since the previous drain.

use actix_web::web::Bytes;
use std::io;
use std::mem;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// Default ceiling on retained output (1 MiB)
pub const DEFAULT_CAPTURE_LIMIT: usize = 1 << 20;

/// Outcome of a non-blocking drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drain {
    /// Bytes written since the previous drain, in write order
    Data(Bytes),
    /// Nothing new yet, more may follow
    Empty,
    /// Nothing stored and nothing more will be stored
    End,
}

#[derive(Debug, Default)]
struct CaptureState {
    pending: Vec<u8>,
    total: usize,
    discarding: bool,
    closed: bool,
}

/// Size-capped output sink shared by one writer and one drainer
#[derive(Debug)]
pub struct CaptureBuffer {
    limit: usize,
    state: Mutex<CaptureState>,
    notify: Notify,
}

impl CaptureBuffer {
    /// Create a buffer retaining at most `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            state: Mutex::new(CaptureState::default()),
            notify: Notify::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Store as much of `data` as fits under the ceiling.
    ///
    /// Always reports the whole slice as written so the producer is never
    /// back-pressured. The write that crosses the ceiling is cut at the
    /// ceiling and flips the buffer into discarding mode.
    pub fn write(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let mut state = self.lock();
        if state.discarding || state.closed {
            return data.len();
        }

        let room = self.limit - state.total;
        let keep = data.len().min(room);
        state.pending.extend_from_slice(&data[..keep]);
        state.total += keep;
        if keep < data.len() {
            state.discarding = true;
        }
        drop(state);

        self.notify.notify_one();
        data.len()
    }

    /// Take everything written since the previous drain
    pub fn drain(&self) -> Drain {
        let mut state = self.lock();
        if !state.pending.is_empty() {
            return Drain::Data(Bytes::from(mem::take(&mut state.pending)));
        }
        if state.discarding || state.closed {
            Drain::End
        } else {
            Drain::Empty
        }
    }

    /// Mark end of input. Stored bytes stay drainable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    /// Wait until the buffer was written to or closed.
    ///
    /// A notification issued while nobody was waiting is kept, so a write
    /// landing between a [`drain`](Self::drain) and this call still wakes
    /// the caller.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }

    /// Bytes retained over the lifetime of the buffer, drained or not
    pub fn total_written(&self) -> usize {
        self.lock().total
    }

    pub fn is_discarding(&self) -> bool {
        self.lock().discarding
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_LIMIT)
    }
}

impl io::Write for &CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(CaptureBuffer::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
