//! Core data types for the railscope telemetry pipeline
//!
//! This module contains the data structures exchanged between the
//! processing core and its host:
//!
//! - [`ExternalContext`] - host-supplied measurement context (reference
//!   voltage, selected reference resistor, MUX mute deadline, manual-run
//!   geometry), read by the core as a point-in-time snapshot per line
//! - [`SharedContext`] - thread-safe cell the host mutates and the
//!   processing thread snapshots
//! - [`TelemetryEvent`] - one sparse output record per processed line
//!
//! The core never reaches into host internals: everything it needs for a
//! line is captured in one [`ExternalContext`] value, and everything it
//! produces for a line fits in one [`TelemetryEvent`].

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Full-scale voltage of the controller's ADC (volts)
pub const ADC_FULL_SCALE_V: f64 = 4.096;

/// ADC resolution used when a `D:` message carries a raw code instead of
/// a decimal voltage
pub const ADC_RESOLUTION: f64 = 32768.0;

/// Rail displacement per full motor step (millimeters)
pub const MM_PER_FULL_STEP: f64 = 0.01;

/// Floor applied to the reference voltage before the divider inversion,
/// to keep the denominator away from zero
pub const MIN_REFERENCE_VOLTAGE_V: f64 = 0.05;

/// Reference resistors wired to the measurement MUX, by channel (kΩ)
pub const REFERENCE_RESISTORS_KOHM: [f64; 16] = [
    3.9, 5.6, 6.8, 10.0, 15.0, 22.0, 27.0, 33.0, 39.0, 47.0, 56.0, 68.0, 82.0, 100.0, 120.0, 150.0,
];

/// Geometry and state of the manual run currently in progress
///
/// Leg positions come from the device in microsteps; the run start/end
/// bounds are in full steps (the unit the run was programmed in).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualRun {
    /// Absolute position where the current leg started (microsteps)
    pub leg_start_microsteps: i64,
    /// Absolute run start position (full steps)
    pub run_start_steps: i64,
    /// Absolute run end position (full steps)
    pub run_end_steps: i64,
    /// Whether the current leg moves toward the run end position
    pub leg_toward_end: bool,
    /// Cycles completed so far (the in-progress cycle is this + 1)
    pub completed_cycles: u32,
    /// When the run started, for elapsed-time stamps on record rows
    pub started_at: Instant,
    /// Whether samples should be emitted as record rows
    pub recording: bool,
}

/// Host-supplied measurement context, snapshotted once per input line
///
/// The host owns and mutates this (typically through [`SharedContext`]);
/// the processing thread only ever reads a copy. Fields the host has not
/// configured yet keep their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalContext {
    /// DAC excitation voltage driving the measurement divider (volts)
    pub reference_voltage_v: f64,
    /// Currently selected reference resistance (kΩ)
    pub current_reference_kohm: f64,
    /// Previously selected reference resistance (kΩ), used while the
    /// electrical channel is still settling after a MUX switch
    pub previous_reference_kohm: f64,
    /// Deadline of the host-armed MUX mute window, if any
    pub mux_mute_until: Option<Instant>,
    /// Microsteps per full step (>= 1)
    pub microstep_factor: u32,
    /// Manual-run geometry, present only while a manual run is active
    pub manual_run: Option<ManualRun>,
}

impl Default for ExternalContext {
    fn default() -> Self {
        Self {
            reference_voltage_v: ADC_FULL_SCALE_V,
            current_reference_kohm: REFERENCE_RESISTORS_KOHM[3],
            previous_reference_kohm: REFERENCE_RESISTORS_KOHM[3],
            mux_mute_until: None,
            microstep_factor: 1,
            manual_run: None,
        }
    }
}

impl ExternalContext {
    /// Reference voltage with the divider-safety floor applied
    pub fn clamped_reference_voltage(&self) -> f64 {
        self.reference_voltage_v.max(MIN_REFERENCE_VOLTAGE_V)
    }

    /// Whether the host-armed MUX mute window covers `now`
    pub fn mux_mute_active(&self, now: Instant) -> bool {
        self.mux_mute_until.is_some_and(|until| now < until)
    }

    /// Microstep factor clamped to at least 1
    pub fn effective_microstep_factor(&self) -> u32 {
        self.microstep_factor.max(1)
    }
}

/// Shared, host-mutable wrapper around [`ExternalContext`]
///
/// The processing thread calls [`SharedContext::snapshot`] once per line;
/// the host applies changes through [`SharedContext::update`]. Each
/// snapshot is internally consistent (taken under the lock).
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    inner: Arc<RwLock<ExternalContext>>,
}

impl SharedContext {
    /// Create a shared context from an initial value
    pub fn new(ctx: ExternalContext) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ctx)),
        }
    }

    /// Take a point-in-time copy of the context
    pub fn snapshot(&self) -> ExternalContext {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply a mutation under the lock
    pub fn update(&self, f: impl FnOnce(&mut ExternalContext)) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }
}

/// A live voltage/resistance pair for time plots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivePoint {
    /// Filtered voltage (volts)
    pub voltage_v: f64,
    /// Estimated (possibly held) resistance (kΩ)
    pub resistance_kohm: f64,
}

/// A displacement-tagged sample emitted during a manual run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplacementPoint {
    /// Distance travelled along the current leg (millimeters)
    pub distance_mm: f64,
    /// Displayed voltage, held across transients (volts)
    pub voltage_v: f64,
    /// Displayed resistance, held across transients (kΩ)
    pub resistance_kohm: f64,
}

/// One row of recorded manual-run data, ready for host-side persistence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    /// 1-based cycle number
    pub cycle: u32,
    /// Seconds since the manual run started
    pub elapsed_s: f64,
    /// Distance travelled along the current leg (millimeters)
    pub distance_mm: f64,
    /// Displayed voltage (volts)
    pub voltage_v: f64,
    /// Displayed resistance (kΩ)
    pub resistance_kohm: f64,
}

/// Output of processing a single input line
///
/// A sparse record: most fields are `None`/`false` for any given line.
/// Constructed fresh per line, handed to the host, never retained by the
/// core. [`TelemetryEvent::is_empty`] reports whether a line produced
/// anything worth forwarding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryEvent {
    /// Voltage/resistance pair for live time plots
    pub live_point: Option<LivePoint>,
    /// Raw device position (microsteps)
    pub position: Option<i64>,
    /// Total travel reported by calibration (full steps)
    pub total_steps: Option<i64>,
    /// Displacement-tagged sample (manual run only)
    pub displacement_point: Option<DisplacementPoint>,
    /// Recorded sample row (recording only)
    pub record_row: Option<RecordRow>,
    /// Calibration finished
    pub calibration_done: bool,
    /// Calibration started
    pub calibration_started: bool,
    /// A manual-run cycle finished (carries the cycle number)
    pub cycle_done: Option<i64>,
    /// The current manual leg reached its target
    pub manual_target_reached: bool,
    /// The manual run paused
    pub manual_paused: bool,
    /// All manual cycles completed
    pub all_cycles_completed: bool,
    /// Device confirmed the active MUX channel
    pub mux_channel_confirmed: Option<u8>,
    /// Free-text message for the host log
    pub log_message: Option<String>,
}

impl TelemetryEvent {
    /// True when no field of the event is populated
    pub fn is_empty(&self) -> bool {
        *self == TelemetryEvent::default()
    }
}
