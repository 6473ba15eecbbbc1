//! Reader worker thread
//!
//! Runs the blocking I/O loop against a [`ByteTransport`], drives the
//! [`LineFramer`], and pushes complete lines into the processing
//! channel in arrival order. The loop sleeps briefly when the link is
//! idle, observes the shared cancellation flag within one transport
//! timeout, and reports its terminal state exactly once - with
//! cancellation distinguishable from a transport failure.

use crate::backend::framer::LineFramer;
use crate::backend::transport::ByteTransport;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Read buffer size for a single transport poll
const READ_CHUNK_BYTES: usize = 4096;

/// Why the reader stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The host requested cancellation (or dropped the line receiver)
    Cancelled,
    /// The transport failed; reconnect policy belongs to the host
    TransportError(String),
}

/// Events flowing from the reader to the processing thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// One complete framed line
    Line(String),
    /// Terminal event, sent exactly once as the last message
    Stopped(StopReason),
}

/// The blocking-read loop feeding the processing thread
pub struct ReaderWorker {
    transport: Box<dyn ByteTransport>,
    framer: LineFramer,
    line_tx: Sender<ReaderEvent>,
    running: Arc<AtomicBool>,
    idle_sleep: Duration,
}

impl ReaderWorker {
    /// Create a reader over `transport`, emitting into `line_tx` until
    /// `running` is cleared or the transport fails
    pub fn new(
        transport: Box<dyn ByteTransport>,
        line_tx: Sender<ReaderEvent>,
        running: Arc<AtomicBool>,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            transport,
            framer: LineFramer::new(),
            line_tx,
            running,
            idle_sleep,
        }
    }

    /// Run the read loop to completion
    pub fn run(mut self) {
        tracing::info!("Serial reader started on {}", self.transport.name());

        let mut buf = [0u8; READ_CHUNK_BYTES];
        let reason = 'outer: loop {
            if !self.running.load(Ordering::SeqCst) {
                break StopReason::Cancelled;
            }
            match self.transport.read_available(&mut buf) {
                Ok(0) => std::thread::sleep(self.idle_sleep),
                Ok(n) => {
                    for line in self.framer.feed(&buf[..n]) {
                        if self.line_tx.send(ReaderEvent::Line(line)).is_err() {
                            break 'outer StopReason::Cancelled;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Serial error in reader: {e}");
                    break StopReason::TransportError(e.to_string());
                }
            }
        };

        let _ = self.line_tx.send(ReaderEvent::Stopped(reason));
        tracing::info!("Serial reader finished");
    }
}
