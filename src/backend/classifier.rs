//! Message classification for controller lines
//!
//! Turns one framed text line into a typed [`Message`]. Parsing is
//! prefix/shape directed and defensive: the controller is known to
//! embed stray characters in numeric fields, so integers are parsed
//! after stripping non-digits (sign retained), and a recognized prefix
//! whose fields still fail to parse degrades to [`Message::Malformed`]
//! rather than an error. Anything unrecognized passes through as
//! [`Message::Unrecognized`] so the host can log it.

use crate::types::{ADC_FULL_SCALE_V, ADC_RESOLUTION};

/// A classified controller message, exactly one per line
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `ADC:<voltage>[:<resistance>]` - live ADC reading, optionally
    /// with a device-computed resistance (kΩ) that overrides local math
    AdcSample {
        voltage_v: f64,
        device_resistance_kohm: Option<f64>,
    },
    /// `D:<pos>:<value>[:<resistance>]` - position-tagged sample; the
    /// value field is either a decimal voltage or a raw ADC code
    PositionSample {
        raw_position: i64,
        voltage_v: f64,
        device_resistance_kohm: Option<f64>,
    },
    /// `TOTAL_STEPS:<n>` - total travel measured by calibration
    TotalSteps { count: i64 },
    /// `$CALIBRATION_DONE`
    CalibrationDone,
    /// `Starting Calibration Process...`
    CalibrationStarted,
    /// `CYCLE_DONE:<n>`
    CycleDone { n: i64 },
    /// `manual target leg reached` (case-insensitive prefix)
    ManualTargetReached,
    /// `manual run paused` (case-insensitive prefix)
    ManualPaused,
    /// `all manual cycles completed` (case-insensitive prefix)
    AllCyclesCompleted,
    /// `POSITION:<n>` - standalone position report (microsteps)
    Position { value: i64 },
    /// `MUX_PINS:<s0>,<s1>,<s2>,<s3>` - confirmed MUX select pins,
    /// S0 is the least significant bit
    MuxPins { s0: u8, s1: u8, s2: u8, s3: u8 },
    /// `$PAUSED`
    Paused,
    /// `-> SET_DAC_V` / `DAC set` device log - arms the resistance mute
    DacChanged { raw: String },
    /// Recognized prefix with unparsable fields; carries a description
    /// for the host log
    Malformed { description: String },
    /// Anything else, passed through as opaque log text
    Unrecognized { raw: String },
}

impl Message {
    /// MUX channel number encoded by a [`Message::MuxPins`] message
    pub fn mux_channel(s0: u8, s1: u8, s2: u8, s3: u8) -> u8 {
        (s0 & 1) | ((s1 & 1) << 1) | ((s2 & 1) << 2) | ((s3 & 1) << 3)
    }
}

/// Classify one cleaned-up line into a [`Message`]
pub fn classify(line: &str) -> Message {
    let s = line.trim();
    let lower = s.to_ascii_lowercase();

    if s == "$PAUSED" {
        Message::Paused
    } else if s == "$CALIBRATION_DONE" {
        Message::CalibrationDone
    } else if s.starts_with("-> SET_DAC_V") || s.starts_with("DAC set") {
        Message::DacChanged { raw: s.to_string() }
    } else if let Some(rest) = s.strip_prefix("ADC:") {
        classify_adc(rest, s)
    } else if let Some(rest) = s.strip_prefix("D:") {
        classify_position_sample(rest, s)
    } else if let Some(rest) = s.strip_prefix("TOTAL_STEPS:") {
        match parse_stripped_int(rest) {
            Some(count) => Message::TotalSteps { count },
            None => malformed("TOTAL_STEPS", s),
        }
    } else if let Some(rest) = s.strip_prefix("CYCLE_DONE:") {
        match parse_stripped_int(rest) {
            Some(n) => Message::CycleDone { n },
            None => malformed("CYCLE_DONE", s),
        }
    } else if let Some(rest) = s.strip_prefix("POSITION:") {
        match parse_stripped_int(rest) {
            Some(value) => Message::Position { value },
            None => malformed("POSITION", s),
        }
    } else if let Some(rest) = s.strip_prefix("MUX_PINS:") {
        classify_mux_pins(rest, s)
    } else if lower.starts_with("manual target leg reached") {
        Message::ManualTargetReached
    } else if lower.starts_with("manual run paused") {
        Message::ManualPaused
    } else if lower.starts_with("all manual cycles completed") {
        Message::AllCyclesCompleted
    } else if s.starts_with("Starting Calibration Process...") {
        Message::CalibrationStarted
    } else {
        Message::Unrecognized { raw: s.to_string() }
    }
}

fn classify_adc(rest: &str, raw: &str) -> Message {
    let mut parts = rest.split(':');
    let voltage_v = match parts.next().map(str::trim).map(str::parse::<f64>) {
        Some(Ok(v)) => v,
        _ => return malformed("ADC", raw),
    };
    // Optional trailing resistance; ignore it if unparsable
    let device_resistance_kohm = parts.next().and_then(|p| p.trim().parse::<f64>().ok());
    Message::AdcSample {
        voltage_v,
        device_resistance_kohm,
    }
}

fn classify_position_sample(rest: &str, raw: &str) -> Message {
    let parts: Vec<&str> = rest.trim().split(':').collect();
    if parts.len() < 2 {
        return Message::Malformed {
            description: format!("Warning: Malformed D message: {raw}"),
        };
    }
    let raw_position = match parts[0].trim().parse::<i64>() {
        Ok(p) => p,
        Err(_) => return malformed("D", raw),
    };
    let voltage_v = match parse_voltage_field(parts[1].trim()) {
        Some(v) => v,
        None => return malformed("D", raw),
    };
    let device_resistance_kohm = parts
        .get(2)
        .and_then(|p| p.trim().parse::<f64>().ok());
    Message::PositionSample {
        raw_position,
        voltage_v,
        device_resistance_kohm,
    }
}

fn classify_mux_pins(rest: &str, raw: &str) -> Message {
    let bits: Vec<Option<u8>> = rest
        .trim()
        .split(',')
        .map(|p| p.trim().parse::<u8>().ok())
        .collect();
    match bits.as_slice() {
        [Some(s0), Some(s1), Some(s2), Some(s3)] => Message::MuxPins {
            s0: *s0,
            s1: *s1,
            s2: *s2,
            s3: *s3,
        },
        _ => malformed("MUX_PINS", raw),
    }
}

fn malformed(what: &str, raw: &str) -> Message {
    Message::Malformed {
        description: format!("Error parsing {what}: {raw}"),
    }
}

/// Parse the `D:` value field: a decimal voltage when it looks like a
/// float, otherwise a raw ADC code converted to volts
fn parse_voltage_field(field: &str) -> Option<f64> {
    if field.contains('.') || field.to_ascii_lowercase().contains('e') {
        field.parse::<f64>().ok()
    } else {
        let code = field.parse::<i64>().ok()?;
        Some(code as f64 / ADC_RESOLUTION * ADC_FULL_SCALE_V)
    }
}

/// Strip non-digit characters before integer parsing; the result is
/// negative when a `-` appeared anywhere in the field
fn parse_stripped_int(field: &str) -> Option<i64> {
    let digits: String = field.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let magnitude = digits.parse::<i64>().ok()?;
    if field.contains('-') {
        Some(-magnitude)
    } else {
        Some(magnitude)
    }
}
