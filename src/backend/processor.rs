//! Per-line processing: classification, conditioning, gating
//!
//! [`LineProcessor`] owns every piece of mutable pipeline state - the
//! voltage filter, the last known-good resistance, the resistance mute
//! deadline, the post-switch settle counter - and is confined to the
//! processing thread. Each call takes one framed line plus a host
//! context snapshot and returns one [`TelemetryEvent`]; lines are
//! processed strictly in arrival order because the gating decisions
//! depend on previously observed state.
//!
//! # Gates
//!
//! Three independent gates decide when displayed values are held at
//! their last known-good value instead of showing a transient glitch:
//!
//! - the **resistance mute window**, armed here on DAC-change log lines
//!   and confirmed MUX switches
//! - the **MUX mute window**, armed by the host through
//!   [`ExternalContext::mux_mute_until`]
//! - the **post-switch settle counter**, set on every confirmed MUX
//!   switch and decremented once per sample after the MUX mute expires
//!
//! They compose with OR semantics and re-arm independently.

use crate::backend::classifier::{classify, Message};
use crate::backend::estimator;
use crate::backend::filter::VoltageFilter;
use crate::config::PipelineConfig;
use crate::types::{
    DisplacementPoint, ExternalContext, LivePoint, RecordRow, TelemetryEvent, MM_PER_FULL_STEP,
};
use std::time::Instant;

/// Stateful line-to-event processor, exclusively owned by the
/// processing thread
#[derive(Debug)]
pub struct LineProcessor {
    config: PipelineConfig,
    filter: VoltageFilter,
    last_resistance_kohm: Option<f64>,
    last_plotted_voltage: Option<f64>,
    resistance_mute_until: Option<Instant>,
    post_mux_settle: u32,
}

impl LineProcessor {
    /// Create a processor with the given tuning
    pub fn new(config: PipelineConfig) -> Self {
        let filter = VoltageFilter::new(
            config.deadband_v,
            config.iir_alpha,
            config.step_threshold_v,
        );
        Self {
            config,
            filter,
            last_resistance_kohm: None,
            last_plotted_voltage: None,
            resistance_mute_until: None,
            post_mux_settle: 0,
        }
    }

    /// Remaining post-switch settle samples
    pub fn post_mux_settle(&self) -> u32 {
        self.post_mux_settle
    }

    /// Deadline of the armed resistance mute window, if any
    pub fn resistance_mute_until(&self) -> Option<Instant> {
        self.resistance_mute_until
    }

    /// Process one framed line against a context snapshot
    pub fn process(&mut self, line: &str, ctx: &ExternalContext, now: Instant) -> TelemetryEvent {
        let mut event = TelemetryEvent::default();
        match classify(line) {
            Message::AdcSample {
                voltage_v,
                device_resistance_kohm,
            } => self.handle_adc_sample(voltage_v, device_resistance_kohm, ctx, now, &mut event),
            Message::PositionSample {
                raw_position,
                voltage_v,
                device_resistance_kohm,
            } => self.handle_position_sample(
                raw_position,
                voltage_v,
                device_resistance_kohm,
                ctx,
                now,
                &mut event,
            ),
            Message::TotalSteps { count } => event.total_steps = Some(count),
            Message::CalibrationDone => event.calibration_done = true,
            Message::CalibrationStarted => event.calibration_started = true,
            Message::CycleDone { n } => event.cycle_done = Some(n),
            Message::ManualTargetReached => event.manual_target_reached = true,
            Message::Paused | Message::ManualPaused => event.manual_paused = true,
            Message::AllCyclesCompleted => event.all_cycles_completed = true,
            Message::Position { value } => event.position = Some(value),
            Message::MuxPins { s0, s1, s2, s3 } => {
                let channel = Message::mux_channel(s0, s1, s2, s3);
                event.mux_channel_confirmed = Some(channel);
                // The electrical channel lags the confirmation: reset
                // the filter and arm both settle gates
                self.filter.note_channel_change();
                self.post_mux_settle = self.config.post_mux_settle_samples;
                self.arm_resistance_mute(now);
                event.log_message = Some(format!(
                    "MUX channel CONFIRMED: {channel} (bits {s3}{s2}{s1}{s0})"
                ));
            }
            Message::DacChanged { raw } => {
                self.arm_resistance_mute(now);
                tracing::debug!("DAC change observed, resistance mute armed");
                event.log_message = Some(raw);
            }
            Message::Malformed { description } => {
                tracing::warn!("{description}");
                event.log_message = Some(description);
            }
            Message::Unrecognized { raw } => event.log_message = Some(raw),
        }
        event
    }

    fn arm_resistance_mute(&mut self, now: Instant) {
        self.resistance_mute_until = Some(now + self.config.resistance_mute_window());
    }

    fn resistance_mute_active(&self, now: Instant) -> bool {
        self.resistance_mute_until.is_some_and(|until| now < until)
    }

    /// Run the voltage filter and decrement the settle counter; shared
    /// head of both sample paths
    fn condition_sample(
        &mut self,
        raw_v: f64,
        ctx: &ExternalContext,
        now: Instant,
    ) -> (f64, bool, bool) {
        let mux_mute = ctx.mux_mute_active(now);
        let voltage = self.filter.apply(raw_v, mux_mute);
        let rt_mute = self.resistance_mute_active(now);
        if self.post_mux_settle > 0 && !mux_mute {
            self.post_mux_settle -= 1;
        }
        (voltage, mux_mute, rt_mute)
    }

    /// Resistance for this sample: the device-reported value wins,
    /// otherwise the divider inversion with the effective reference and
    /// a last-known-good fallback
    fn estimate_resistance(
        &self,
        voltage: f64,
        device_resistance_kohm: Option<f64>,
        ctx: &ExternalContext,
        mux_mute: bool,
    ) -> f64 {
        if let Some(device) = device_resistance_kohm {
            return device;
        }
        let reference_v = ctx.clamped_reference_voltage();
        let reference_kohm =
            estimator::effective_reference_kohm(ctx, mux_mute, self.post_mux_settle);
        let resistance = estimator::divider_resistance(voltage, reference_v, reference_kohm)
            .unwrap_or_else(|| self.last_resistance_kohm.unwrap_or(0.0));
        if self.config.outlier_rejection {
            estimator::reject_outlier(self.last_resistance_kohm, resistance)
        } else {
            resistance
        }
    }

    fn handle_adc_sample(
        &mut self,
        raw_v: f64,
        device_resistance_kohm: Option<f64>,
        ctx: &ExternalContext,
        now: Instant,
        event: &mut TelemetryEvent,
    ) {
        let (voltage, mux_mute, rt_mute) = self.condition_sample(raw_v, ctx, now);
        let resistance = self.estimate_resistance(voltage, device_resistance_kohm, ctx, mux_mute);

        let resistance_kohm = match (rt_mute, self.last_resistance_kohm) {
            (true, Some(held)) => held,
            _ => {
                self.last_resistance_kohm = Some(resistance);
                resistance
            }
        };

        event.live_point = Some(LivePoint {
            voltage_v: voltage,
            resistance_kohm,
        });
    }

    fn handle_position_sample(
        &mut self,
        raw_position: i64,
        raw_v: f64,
        device_resistance_kohm: Option<f64>,
        ctx: &ExternalContext,
        now: Instant,
        event: &mut TelemetryEvent,
    ) {
        let (voltage, mux_mute, rt_mute) = self.condition_sample(raw_v, ctx, now);
        let resistance = self.estimate_resistance(voltage, device_resistance_kohm, ctx, mux_mute);

        // Position samples hold both displayed values across any active
        // gate, not just the resistance mute
        let hold = rt_mute || mux_mute || self.post_mux_settle > 0;
        let (held_resistance, held_voltage) = match (hold, self.last_resistance_kohm) {
            (true, Some(held)) => (held, self.last_plotted_voltage.unwrap_or(voltage)),
            _ => {
                self.last_resistance_kohm = Some(resistance);
                self.last_plotted_voltage = Some(voltage);
                (resistance, voltage)
            }
        };

        event.live_point = Some(LivePoint {
            voltage_v: voltage,
            resistance_kohm: held_resistance,
        });
        event.position = Some(raw_position);

        let Some(run) = ctx.manual_run else {
            return;
        };

        let microsteps = ctx.effective_microstep_factor() as f64;
        let current_full = raw_position as f64 / microsteps;
        let leg_start_full = run.leg_start_microsteps as f64 / microsteps;
        let total_leg_full = (run.run_end_steps - run.run_start_steps).abs() as f64;
        let from_leg_start_full = (current_full - leg_start_full).abs();

        let mut distance_mm = if run.leg_toward_end {
            from_leg_start_full * MM_PER_FULL_STEP
        } else {
            (total_leg_full - from_leg_start_full) * MM_PER_FULL_STEP
        };
        let leg_length_mm = total_leg_full * MM_PER_FULL_STEP;
        distance_mm = distance_mm.max(0.0);
        if leg_length_mm > 0.0 && distance_mm > leg_length_mm {
            distance_mm = leg_length_mm;
        }

        event.displacement_point = Some(DisplacementPoint {
            distance_mm,
            voltage_v: held_voltage,
            resistance_kohm: held_resistance,
        });

        if run.recording {
            event.record_row = Some(RecordRow {
                cycle: run.completed_cycles + 1,
                elapsed_s: now.duration_since(run.started_at).as_secs_f64(),
                distance_mm,
                voltage_v: held_voltage,
                resistance_kohm: held_resistance,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManualRun;
    use std::time::Duration;

    fn processor() -> LineProcessor {
        LineProcessor::new(PipelineConfig::default())
    }

    fn ctx() -> ExternalContext {
        ExternalContext {
            reference_voltage_v: 4.096,
            current_reference_kohm: 10.0,
            previous_reference_kohm: 10.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_adc_sample_computes_divider_resistance() {
        let mut p = processor();
        let ev = p.process("ADC:1.234", &ctx(), Instant::now());
        let point = ev.live_point.unwrap();
        assert_eq!(point.voltage_v, 1.234);
        let expected = 1.234 * 10.0 / (4.096 - 1.234);
        assert!((point.resistance_kohm - expected).abs() < 1e-9);
        assert!((point.resistance_kohm - 4.31).abs() < 0.005);
    }

    #[test]
    fn test_device_resistance_overrides_local_math() {
        let mut p = processor();
        let ev = p.process("ADC:1.234:99.5", &ctx(), Instant::now());
        assert_eq!(ev.live_point.unwrap().resistance_kohm, 99.5);
    }

    #[test]
    fn test_zero_denominator_falls_back_to_last_known_good() {
        let mut p = processor();
        let now = Instant::now();
        let first = p.process("ADC:1.0", &ctx(), now).live_point.unwrap();
        // Voltage equal to the reference: denominator collapses, the
        // estimator returns the previous value (after the >50 mV filter
        // bypass adopts the new raw voltage)
        let second = p
            .process("ADC:4.096", &ctx(), now + Duration::from_millis(10))
            .live_point
            .unwrap();
        assert_eq!(second.voltage_v, 4.096);
        assert_eq!(second.resistance_kohm, first.resistance_kohm);
    }

    #[test]
    fn test_zero_denominator_without_history_yields_zero() {
        let mut p = processor();
        let ev = p.process("ADC:4.096", &ctx(), Instant::now());
        assert_eq!(ev.live_point.unwrap().resistance_kohm, 0.0);
    }

    #[test]
    fn test_mux_pins_arms_gates() {
        let mut p = processor();
        let now = Instant::now();
        let ev = p.process("MUX_PINS:1,0,1,0", &ctx(), now);
        assert_eq!(ev.mux_channel_confirmed, Some(5));
        assert_eq!(p.post_mux_settle(), 3);
        assert!(p.resistance_mute_until().unwrap() >= now + Duration::from_millis(100));
        assert_eq!(
            ev.log_message.as_deref(),
            Some("MUX channel CONFIRMED: 5 (bits 0101)")
        );
    }

    #[test]
    fn test_resistance_held_during_mute_window() {
        let mut p = processor();
        let now = Instant::now();
        let before = p.process("ADC:1.0", &ctx(), now).live_point.unwrap();

        p.process("MUX_PINS:0,1,0,0", &ctx(), now + Duration::from_millis(1));

        // Inside the 100 ms window the resistance holds even though the
        // voltage moved
        let during = p
            .process("ADC:2.0", &ctx(), now + Duration::from_millis(10))
            .live_point
            .unwrap();
        assert_eq!(during.resistance_kohm, before.resistance_kohm);
        assert_eq!(during.voltage_v, 2.0);
    }

    #[test]
    fn test_settle_counter_decrements_after_mux_mute_expires() {
        let mut p = processor();
        let now = Instant::now();
        p.process("MUX_PINS:0,0,0,1", &ctx(), now);
        assert_eq!(p.post_mux_settle(), 3);

        let later = now + Duration::from_millis(200);
        for expected in [2, 1, 0] {
            p.process("ADC:1.0", &ctx(), later);
            assert_eq!(p.post_mux_settle(), expected);
        }
    }

    #[test]
    fn test_settle_counter_frozen_while_host_mux_mute_active() {
        let mut p = processor();
        let now = Instant::now();
        p.process("MUX_PINS:0,0,0,1", &ctx(), now);

        let muted = ExternalContext {
            mux_mute_until: Some(now + Duration::from_secs(10)),
            ..ctx()
        };
        p.process("ADC:1.0", &muted, now + Duration::from_millis(200));
        assert_eq!(p.post_mux_settle(), 3);
    }

    #[test]
    fn test_previous_reference_used_while_settling() {
        let mut p = processor();
        let now = Instant::now();
        let before = p.process("ADC:1.0", &ctx(), now).live_point.unwrap();

        p.process("MUX_PINS:1,0,0,0", &ctx(), now);

        // Past the mute window but inside the settle count: the math
        // must still use the previous 10 kΩ reference, so an unchanged
        // voltage yields an unchanged resistance despite the new 22 kΩ
        // selection
        let switched = ExternalContext {
            current_reference_kohm: 22.0,
            previous_reference_kohm: 10.0,
            ..ctx()
        };
        let later = now + Duration::from_millis(200);
        let ev = p.process("ADC:1.0", &switched, later).live_point.unwrap();
        assert_eq!(ev.resistance_kohm, before.resistance_kohm);
    }

    #[test]
    fn test_dac_change_arms_mute_and_logs_raw_line() {
        let mut p = processor();
        let now = Instant::now();
        let ev = p.process("-> SET_DAC_V 2.000", &ctx(), now);
        assert_eq!(ev.log_message.as_deref(), Some("-> SET_DAC_V 2.000"));
        assert!(p.resistance_mute_until().unwrap() >= now + Duration::from_millis(100));
        assert!(ev.live_point.is_none());
    }

    #[test]
    fn test_malformed_d_line_yields_warning_only() {
        let mut p = processor();
        let ev = p.process("D:5", &ctx(), Instant::now());
        assert!(ev.log_message.unwrap().contains("Malformed D message"));
        assert!(ev.live_point.is_none());
        assert!(ev.position.is_none());
    }

    #[test]
    fn test_discrete_signals() {
        let mut p = processor();
        let now = Instant::now();
        let c = ctx();
        assert_eq!(p.process("TOTAL_STEPS:abc123-", &c, now).total_steps, Some(-123));
        assert!(p.process("$CALIBRATION_DONE", &c, now).calibration_done);
        assert!(p.process("Starting Calibration Process...", &c, now).calibration_started);
        assert_eq!(p.process("CYCLE_DONE:2", &c, now).cycle_done, Some(2));
        assert!(p.process("$PAUSED", &c, now).manual_paused);
        assert!(p.process("manual run paused", &c, now).manual_paused);
        assert!(p.process("manual target leg reached", &c, now).manual_target_reached);
        assert!(p.process("all manual cycles completed", &c, now).all_cycles_completed);
        assert_eq!(p.process("POSITION:240", &c, now).position, Some(240));
        assert_eq!(
            p.process("some device chatter", &c, now).log_message.as_deref(),
            Some("some device chatter")
        );
    }

    #[test]
    fn test_position_sample_emits_position_and_live_point() {
        let mut p = processor();
        let ev = p.process("D:1600:1.0", &ctx(), Instant::now());
        assert_eq!(ev.position, Some(1600));
        assert!(ev.live_point.is_some());
        assert!(ev.displacement_point.is_none());
        assert!(ev.record_row.is_none());
    }

    fn manual_ctx(now: Instant, recording: bool) -> ExternalContext {
        ExternalContext {
            microstep_factor: 16,
            manual_run: Some(ManualRun {
                leg_start_microsteps: 0,
                run_start_steps: 0,
                run_end_steps: 500,
                leg_toward_end: true,
                completed_cycles: 1,
                started_at: now,
                recording,
            }),
            ..ctx()
        }
    }

    #[test]
    fn test_displacement_point_during_manual_run() {
        let mut p = processor();
        let now = Instant::now();
        // 1600 microsteps = 100 full steps = 1.0 mm
        let ev = p.process("D:1600:1.0", &manual_ctx(now, false), now);
        let dp = ev.displacement_point.unwrap();
        assert!((dp.distance_mm - 1.0).abs() < 1e-9);
        assert_eq!(dp.voltage_v, 1.0);
        assert!(ev.record_row.is_none());
    }

    #[test]
    fn test_displacement_clamped_to_leg_length() {
        let mut p = processor();
        let now = Instant::now();
        // 16000 microsteps = 1000 full steps, past the 500-step leg
        let ev = p.process("D:16000:1.0", &manual_ctx(now, false), now);
        let dp = ev.displacement_point.unwrap();
        assert!((dp.distance_mm - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_return_leg_measures_from_far_end() {
        let mut p = processor();
        let now = Instant::now();
        let mut c = manual_ctx(now, false);
        if let Some(run) = c.manual_run.as_mut() {
            run.leg_toward_end = false;
        }
        // 100 full steps from the leg start on the way back: 500 - 100
        // = 400 full steps = 4.0 mm from the origin
        let ev = p.process("D:1600:1.0", &c, now);
        assert!((ev.displacement_point.unwrap().distance_mm - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_row_while_recording() {
        let mut p = processor();
        let started = Instant::now();
        let now = started + Duration::from_millis(2500);
        let ev = p.process("D:1600:1.0", &manual_ctx(started, true), now);
        let row = ev.record_row.unwrap();
        assert_eq!(row.cycle, 2);
        assert!((row.elapsed_s - 2.5).abs() < 1e-9);
        assert!((row.distance_mm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_sample_holds_voltage_and_resistance_while_gated() {
        let mut p = processor();
        let now = Instant::now();
        let first = p.process("D:0:1.0", &ctx(), now);
        let baseline = first.live_point.unwrap();

        p.process("MUX_PINS:0,1,0,0", &ctx(), now);

        let ev = p.process("D:100:2.0", &manual_ctx(now, false), now + Duration::from_millis(5));
        let dp = ev.displacement_point.unwrap();
        assert_eq!(dp.resistance_kohm, baseline.resistance_kohm);
        assert_eq!(dp.voltage_v, 1.0);
        // The live point still shows the moving voltage
        assert_eq!(ev.live_point.unwrap().voltage_v, 2.0);
    }

    #[test]
    fn test_outlier_rejection_when_enabled() {
        let config = PipelineConfig {
            outlier_rejection: true,
            ..Default::default()
        };
        let mut p = LineProcessor::new(config);
        let now = Instant::now();
        let first = p.process("ADC:1.0", &ctx(), now).live_point.unwrap();
        // A 2 V jump maps to a resistance far outside the 10% band, so
        // the rejector pins the output to the previous estimate
        let second = p
            .process("ADC:3.0", &ctx(), now + Duration::from_millis(5))
            .live_point
            .unwrap();
        assert_eq!(second.resistance_kohm, first.resistance_kohm);
    }
}
