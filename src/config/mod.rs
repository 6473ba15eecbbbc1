//! Configuration for the railscope core
//!
//! All tunables of the transport and the signal-conditioning pipeline
//! live here, serializable to TOML so a host can persist them. Defaults
//! match the controller's shipped firmware and the conditioning
//! constants the device was tuned with; most deployments never change
//! them.
//!
//! # Main Types
//!
//! - [`AppConfig`] - top-level container with TOML load/save
//! - [`SerialConfig`] - link parameters (baud, timeouts, DTR reset)
//! - [`PipelineConfig`] - filter and gating tunables

use crate::error::{RailscopeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Serial link parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate of the controller link
    pub baud_rate: u32,

    /// Blocking-read timeout (milliseconds); also bounds how quickly
    /// the reader observes cancellation
    pub read_timeout_ms: u64,

    /// Sleep when a read returns nothing, to avoid busy-spinning
    /// (milliseconds)
    pub idle_sleep_ms: u64,

    /// Pulse DTR on open to reset the board quickly
    pub dtr_reset: bool,

    /// Settle wait after opening the port before reading
    /// (milliseconds); boards without the DTR reset need more, around
    /// 1800
    pub post_open_delay_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 250_000,
            read_timeout_ms: 100,
            idle_sleep_ms: 2,
            dtr_reset: true,
            post_open_delay_ms: 1200,
        }
    }
}

/// Signal-conditioning and gating tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Voltage deadband below which changes are treated as noise (volts)
    pub deadband_v: f64,

    /// IIR smoothing coefficient (1.0 = no smoothing)
    pub iir_alpha: f64,

    /// Step size above which smoothing is bypassed (volts)
    pub step_threshold_v: f64,

    /// Resistance mute window armed on DAC/MUX changes (milliseconds)
    pub resistance_mute_window_ms: u64,

    /// Samples to keep using the previous reference resistance after a
    /// confirmed MUX switch, once the MUX mute window has expired
    pub post_mux_settle_samples: u32,

    /// Replace implausible resistance jumps with the last accepted
    /// value before the mute/hold decision
    pub outlier_rejection: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadband_v: 0.005,
            iir_alpha: 0.7,
            step_threshold_v: 0.05,
            resistance_mute_window_ms: 100,
            post_mux_settle_samples: 3,
            outlier_rejection: false,
        }
    }
}

impl PipelineConfig {
    /// Resistance mute window as a [`Duration`]
    pub fn resistance_mute_window(&self) -> Duration {
        Duration::from_millis(self.resistance_mute_window_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link parameters
    pub serial: SerialConfig,
    /// Pipeline tunables
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&text)
            .map_err(|e| RailscopeError::Config(format!("failed to parse config: {e}")))
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| RailscopeError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_device_tuning() {
        let config = AppConfig::default();
        assert_eq!(config.serial.baud_rate, 250_000);
        assert_eq!(config.pipeline.deadband_v, 0.005);
        assert_eq!(config.pipeline.iir_alpha, 0.7);
        assert_eq!(config.pipeline.resistance_mute_window_ms, 100);
        assert_eq!(config.pipeline.post_mux_settle_samples, 3);
        assert!(!config.pipeline.outlier_rejection);
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("railscope.toml");

        let mut config = AppConfig::default();
        config.serial.baud_rate = 115_200;
        config.pipeline.outlier_rejection = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[pipeline]\niir_alpha = 0.3\n").unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.pipeline.iir_alpha, 0.3);
        assert_eq!(loaded.serial, SerialConfig::default());
        assert_eq!(loaded.pipeline.deadband_v, 0.005);
    }
}
