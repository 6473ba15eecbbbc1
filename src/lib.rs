//! # Railscope: serial telemetry core for a linear-rail controller
//!
//! Railscope ingests the newline-framed ASCII stream of a
//! serial-connected motion/sensor controller, reconstructs and
//! classifies its messages, and conditions raw ADC readings into a
//! stable voltage/resistance telemetry stream. The graphical host
//! (plots, CSV recording, run sequencing, command sending) sits on top
//! of this crate and only ever sees [`types::TelemetryEvent`]s.
//!
//! ## Architecture
//!
//! - **Backend**: a reader thread doing blocking serial reads and line
//!   framing, plus a processing thread that owns all filter/gating
//!   state, joined by a FIFO crossbeam channel
//! - **Context**: the host publishes reference voltage, selected
//!   reference resistor and run geometry through
//!   [`types::SharedContext`]; the core snapshots it once per line and
//!   never reaches back into host state
//! - **Conditioning**: IIR/deadband voltage filter with step bypass,
//!   divider-inversion resistance estimation, and three OR-composed
//!   mute gates that hide MUX/DAC switching transients
//!
//! ## Example
//!
//! ```ignore
//! use railscope::backend::{BackendMessage, SerialTransport, TelemetryBackend};
//! use railscope::config::AppConfig;
//! use railscope::types::SharedContext;
//!
//! let config = AppConfig::default();
//! let transport = SerialTransport::open("/dev/ttyUSB0", &config.serial)?;
//! let (handle, messages) =
//!     TelemetryBackend::spawn(Box::new(transport), SharedContext::default(), &config);
//! for msg in messages {
//!     println!("{msg:?}");
//! }
//! handle.join();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod types;

pub use error::{RailscopeError, Result};
