//! Backend module: the two-thread telemetry core
//!
//! Everything here runs off the host/UI thread. Two activities run
//! concurrently, joined by a single FIFO channel so ordering is
//! preserved end to end:
//!
//! - [`ReaderWorker`] - blocking reads against a [`ByteTransport`],
//!   line framing, short idle sleeps, prompt cancellation
//! - the processing loop - sole owner of [`LineProcessor`] state,
//!   snapshots the [`SharedContext`](crate::types::SharedContext) once
//!   per line and emits one [`TelemetryEvent`] per line, in strict
//!   input order
//!
//! # Example
//!
//! ```ignore
//! use railscope::backend::{BackendMessage, SerialTransport, TelemetryBackend};
//! use railscope::config::AppConfig;
//! use railscope::types::SharedContext;
//!
//! let config = AppConfig::default();
//! let transport = SerialTransport::open("/dev/ttyUSB0", &config.serial)?;
//! let context = SharedContext::default();
//! let (handle, messages) = TelemetryBackend::spawn(Box::new(transport), context, &config);
//!
//! for msg in messages {
//!     match msg {
//!         BackendMessage::Event(event) => { /* update UI, persist */ }
//!         BackendMessage::TransportError(e) => { /* offer reconnect */ }
//!         BackendMessage::Stopped => break,
//!     }
//! }
//! handle.join();
//! ```

pub mod classifier;
pub mod estimator;
pub mod filter;
pub mod framer;
pub mod processor;
pub mod reader;
pub mod transport;

pub use classifier::{classify, Message};
pub use filter::VoltageFilter;
pub use framer::{LineFramer, MAX_BUFFER_BYTES, MAX_LINE_BYTES};
pub use processor::LineProcessor;
pub use reader::{ReaderEvent, ReaderWorker, StopReason};
pub use transport::{ByteTransport, MockTransport, SerialTransport};

use crate::config::AppConfig;
use crate::types::{SharedContext, TelemetryEvent};
use crossbeam_channel::{unbounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Messages delivered from the backend to the host
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// One processed line's telemetry (empty events are dropped)
    Event(TelemetryEvent),
    /// The transport failed; the backend is winding down
    TransportError(String),
    /// Terminal message, sent exactly once
    Stopped,
}

/// Handle over the running backend threads
pub struct BackendHandle {
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    processor: Option<JoinHandle<()>>,
}

impl BackendHandle {
    /// Request cooperative shutdown; the reader observes this within
    /// one transport timeout
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for both threads to finish
    pub fn join(mut self) {
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if let Some(processor) = self.processor.take() {
            let _ = processor.join();
        }
    }
}

/// Entry point: wires transport → reader → processor → host channel
pub struct TelemetryBackend;

impl TelemetryBackend {
    /// Spawn the reader and processing threads over `transport`
    ///
    /// The returned receiver yields [`BackendMessage`]s in input order,
    /// ending with exactly one [`BackendMessage::Stopped`] (preceded by
    /// [`BackendMessage::TransportError`] if the link failed rather
    /// than being cancelled).
    pub fn spawn(
        transport: Box<dyn ByteTransport>,
        context: SharedContext,
        config: &AppConfig,
    ) -> (BackendHandle, Receiver<BackendMessage>) {
        let running = Arc::new(AtomicBool::new(true));
        let (line_tx, line_rx) = unbounded();
        let (message_tx, message_rx) = unbounded();

        let reader = ReaderWorker::new(
            transport,
            line_tx,
            running.clone(),
            Duration::from_millis(config.serial.idle_sleep_ms),
        );
        let reader_handle = std::thread::spawn(move || reader.run());

        let mut processor = LineProcessor::new(config.pipeline.clone());
        let processor_handle = std::thread::spawn(move || {
            tracing::info!("Processing thread started");
            for reader_event in line_rx {
                match reader_event {
                    ReaderEvent::Line(line) => {
                        let ctx = context.snapshot();
                        let event = processor.process(&line, &ctx, Instant::now());
                        if !event.is_empty()
                            && message_tx.send(BackendMessage::Event(event)).is_err()
                        {
                            // Host went away; nothing left to do
                            break;
                        }
                    }
                    ReaderEvent::Stopped(StopReason::Cancelled) => break,
                    ReaderEvent::Stopped(StopReason::TransportError(e)) => {
                        let _ = message_tx.send(BackendMessage::TransportError(e));
                        break;
                    }
                }
            }
            let _ = message_tx.send(BackendMessage::Stopped);
            tracing::info!("Processing thread stopped");
        });

        (
            BackendHandle {
                running,
                reader: Some(reader_handle),
                processor: Some(processor_handle),
            },
            message_rx,
        )
    }
}
