//! Streaming captured output back to the caller
//!
//! [`OutputStream`] drains a [`CaptureBuffer`] under two timers: an absolute
//! deadline counted from creation, and an idle timeout counted from the last
//! drain that produced bytes. [`respond`] turns it into an HTTP response and
//! commits to `200 text/plain` only once the first chunk is in hand, so the
//! headers can never precede or contradict the body.

use crate::execution::capture::{CaptureBuffer, Drain};
use actix_web::HttpResponse;
use actix_web::web::Bytes;
use futures::stream::{self, Stream};
use log::debug;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default ceiling on how long a run request streams output
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(1);

/// Default gap between chunks after which streaming stops
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(200);

/// Body sent when the window closes before any output
pub const NO_OUTPUT_MESSAGE: &str = "Command started but no output yet.";

pub const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Timers bounding one streamed response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub deadline: Duration,
    pub idle_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Why streaming stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Deadline,
    Idle,
    EndOfOutput,
}

/// Incremental drain of one process's captured output
#[derive(Debug)]
pub struct OutputStream {
    buffer: Arc<CaptureBuffer>,
    /// `None` when the deadline is too far out to represent
    deadline: Option<Instant>,
    idle_timeout: Duration,
    last_data: Option<Instant>,
    sent: usize,
    stopped: Option<StopReason>,
}

impl OutputStream {
    pub fn new(buffer: Arc<CaptureBuffer>, settings: &StreamSettings) -> Self {
        Self {
            buffer,
            deadline: Instant::now().checked_add(settings.deadline),
            idle_timeout: settings.idle_timeout,
            last_data: None,
            sent: 0,
            stopped: None,
        }
    }

    /// Bytes handed out so far
    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    /// Next chunk of output, or `None` once the window has closed.
    ///
    /// The idle timer is armed by the first chunk; until then only the
    /// deadline or the end of output ends the wait.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.stopped.is_some() {
            return None;
        }

        loop {
            let now = Instant::now();
            if self.deadline.is_some_and(|deadline| now >= deadline) {
                // Whatever landed right at the deadline still goes out.
                let last = match self.buffer.drain() {
                    Drain::Data(bytes) => Some(self.deliver(bytes, now)),
                    Drain::Empty | Drain::End => None,
                };
                self.stop(StopReason::Deadline);
                return last;
            }

            match self.buffer.drain() {
                Drain::Data(bytes) => return Some(self.deliver(bytes, now)),
                Drain::End => {
                    self.stop(StopReason::EndOfOutput);
                    return None;
                }
                Drain::Empty => {}
            }

            let idle_at = self
                .last_data
                .and_then(|last| last.checked_add(self.idle_timeout));
            if idle_at.is_some_and(|idle_at| now >= idle_at) {
                debug!(
                    "no output for more than {:?}, wrapping up.",
                    self.idle_timeout
                );
                self.stop(StopReason::Idle);
                return None;
            }

            let wake_at = match (idle_at, self.deadline) {
                (Some(idle_at), Some(deadline)) => Some(idle_at.min(deadline)),
                (wake_at, None) | (None, wake_at) => wake_at,
            };
            match wake_at {
                Some(wake_at) => {
                    let wake_at = tokio::time::Instant::from_std(wake_at);
                    // Timing out just loops back to re-check both timers.
                    let _ = tokio::time::timeout_at(wake_at, self.buffer.changed()).await;
                }
                None => self.buffer.changed().await,
            }
        }
    }

    fn deliver(&mut self, bytes: Bytes, now: Instant) -> Bytes {
        self.last_data = Some(now);
        self.sent += bytes.len();
        bytes
    }

    fn stop(&mut self, reason: StopReason) {
        debug!("streaming stopped ({:?}) after {} bytes", reason, self.sent);
        self.stopped = Some(reason);
    }

    /// Response body starting with `first` and continuing with the
    /// remaining chunks
    pub fn into_body(self, first: Bytes) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::unfold((Some(first), self), |(first, mut output)| async move {
            let chunk = match first {
                Some(chunk) => chunk,
                None => output.next_chunk().await?,
            };
            Some((Ok(chunk), (None, output)))
        })
    }
}

// Output nobody will read is not kept. The reader thread keeps emptying the
// pipe, the buffer just stops storing it.
impl Drop for OutputStream {
    fn drop(&mut self) {
        self.buffer.close();
    }
}

/// Build the response for a freshly started command.
///
/// Waits for the first chunk; a response with no output at all gets
/// [`NO_OUTPUT_MESSAGE`] as its body. The process is left running either
/// way, but its capture buffer is closed once the response no longer needs
/// it.
pub async fn respond(buffer: Arc<CaptureBuffer>, settings: &StreamSettings) -> HttpResponse {
    let mut output = OutputStream::new(buffer, settings);
    match output.next_chunk().await {
        Some(first) => HttpResponse::Ok()
            .content_type(PLAIN_TEXT)
            .streaming(output.into_body(first)),
        None => HttpResponse::Ok()
            .content_type(PLAIN_TEXT)
            .body(NO_OUTPUT_MESSAGE),
    }
}
