//! Byte transports feeding the line framer
//!
//! [`ByteTransport`] is the seam between the reader loop and the
//! physical link, so the pipeline can run against real hardware
//! ([`SerialTransport`]) or a scripted [`MockTransport`] in tests and
//! offline development.
//!
//! The contract is poll-style: `read_available` returns `Ok(0)` when no
//! bytes arrived within the transport's short internal timeout, a
//! positive count when data was read, and `Err` only for a real link
//! failure (which terminates the reader).

use crate::config::SerialConfig;
use crate::error::Result;
use serialport::{ClearBuffer, SerialPort};
use std::collections::VecDeque;
use std::io::Read;
use std::time::Duration;

/// An ordered byte stream with bounded-wait reads
pub trait ByteTransport: Send {
    /// Read whatever is available into `buf`, waiting at most the
    /// transport's configured timeout; `Ok(0)` means nothing arrived
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Human-readable name for log messages
    fn name(&self) -> &str;
}

/// Serial-port transport for the controller link
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port per `config`, optionally pulsing DTR to reset
    /// the board, then flushing whatever the boot chatter left behind
    pub fn open(port_name: &str, config: &SerialConfig) -> Result<Self> {
        tracing::info!(
            "Opening {} at {} baud (timeout {} ms)",
            port_name,
            config.baud_rate,
            config.read_timeout_ms
        );
        let mut port = serialport::new(port_name, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open()?;

        if config.dtr_reset {
            // Fast reset cuts the post-open wait on most boards
            port.write_data_terminal_ready(false)?;
            std::thread::sleep(Duration::from_millis(50));
            port.write_data_terminal_ready(true)?;
        }
        std::thread::sleep(Duration::from_millis(config.post_open_delay_ms));
        port.clear(ClearBuffer::Input)?;

        Ok(Self {
            port,
            port_name: port_name.to_string(),
        })
    }

    /// Names of serial ports present on the system
    pub fn list_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

impl ByteTransport for SerialTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        // Read what is queued, or at least 1 byte so the port timeout
        // paces the loop when the line is idle
        let queued = self.port.bytes_to_read()? as usize;
        let want = queued.clamp(1, buf.len());
        match self.port.read(&mut buf[..want]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

/// Scripted in-memory transport for tests and deterministic playback
///
/// Yields its chunks in order, then either reports `Ok(0)` forever or
/// fails with a scripted error to exercise the terminal path.
#[derive(Debug, Default)]
pub struct MockTransport {
    chunks: VecDeque<Vec<u8>>,
    final_error: Option<String>,
}

impl MockTransport {
    /// Transport that replays `chunks` and then stays silent
    pub fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
            final_error: None,
        }
    }

    /// Fail with `message` once all chunks are consumed
    pub fn failing_after(mut self, message: impl Into<String>) -> Self {
        self.final_error = Some(message.into());
        self
    }
}

impl ByteTransport for MockTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            return match self.final_error.take() {
                Some(msg) => Err(std::io::Error::new(std::io::ErrorKind::Other, msg).into()),
                None => Ok(0),
            };
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            let rest = chunk.split_off(n);
            self.chunks.push_front(rest);
        }
        Ok(n)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
