//! Single-variable voltage conditioning
//!
//! [`VoltageFilter`] smooths raw ADC voltages with a first-order IIR
//! stage plus a deadband, but must react instantly to genuine step
//! changes (a DAC move, a MUX channel switch). The decision order is
//! therefore fixed, first match wins:
//!
//! 1. MUX mute window active and a prior value exists → hold it
//! 2. a MUX channel change was just confirmed → drop filter memory and
//!    adopt the raw value (fast re-acquisition)
//! 3. no prior value → seed with the raw value
//! 4. jump larger than the step threshold → adopt the raw value
//!    (intentional change, not noise)
//! 5. change smaller than the deadband → hold the prior value
//! 6. otherwise `new = (1-α)·prior + α·raw`

/// Default deadband below which input changes are treated as noise (5 mV)
pub const DEFAULT_DEADBAND_V: f64 = 0.005;

/// Default IIR smoothing coefficient
pub const DEFAULT_IIR_ALPHA: f64 = 0.7;

/// Default step size above which smoothing is bypassed (50 mV)
pub const DEFAULT_STEP_THRESHOLD_V: f64 = 0.05;

/// IIR/deadband filter with bypass-on-jump and reset-on-channel-change
#[derive(Debug, Clone)]
pub struct VoltageFilter {
    deadband_v: f64,
    alpha: f64,
    step_threshold_v: f64,
    last_filtered: Option<f64>,
    channel_change_pending: bool,
}

impl Default for VoltageFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_DEADBAND_V,
            DEFAULT_IIR_ALPHA,
            DEFAULT_STEP_THRESHOLD_V,
        )
    }
}

impl VoltageFilter {
    /// Create a filter with explicit tuning
    pub fn new(deadband_v: f64, alpha: f64, step_threshold_v: f64) -> Self {
        Self {
            deadband_v,
            alpha,
            step_threshold_v,
            last_filtered: None,
            channel_change_pending: false,
        }
    }

    /// Last output, if any sample has been seen
    pub fn last_filtered(&self) -> Option<f64> {
        self.last_filtered
    }

    /// Note a confirmed MUX channel change; the next sample resets the
    /// filter instead of being smoothed against stale memory
    pub fn note_channel_change(&mut self) {
        self.channel_change_pending = true;
    }

    /// Condition one raw voltage sample
    ///
    /// `mux_mute_active` is the host-armed MUX mute gate: while set, the
    /// output is frozen at the previous value regardless of input.
    pub fn apply(&mut self, raw_v: f64, mux_mute_active: bool) -> f64 {
        if mux_mute_active {
            if let Some(prev) = self.last_filtered {
                return prev;
            }
        }

        if self.channel_change_pending {
            self.channel_change_pending = false;
            self.last_filtered = Some(raw_v);
            return raw_v;
        }

        let prev = match self.last_filtered {
            Some(prev) => prev,
            None => {
                self.last_filtered = Some(raw_v);
                return raw_v;
            }
        };

        let change = (raw_v - prev).abs();
        if change > self.step_threshold_v {
            self.last_filtered = Some(raw_v);
            return raw_v;
        }
        if change < self.deadband_v {
            return prev;
        }

        let filtered = (1.0 - self.alpha) * prev + self.alpha * raw_v;
        self.last_filtered = Some(filtered);
        filtered
    }
}
