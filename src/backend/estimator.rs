//! Resistance estimation from the measurement divider
//!
//! The device measures the unknown resistance R_t at the bottom of a
//! voltage divider driven by the DAC reference voltage V_in through a
//! MUX-selected reference resistor R_ref:
//!
//! `R_t = V_out · R_ref / (V_in − V_out)`
//!
//! Numeric edge cases (denominator near zero, unset reference resistor)
//! resolve to the caller's last known-good value, never to NaN or a
//! blown-up figure. While the electrical channel is still settling
//! after a MUX switch, the *previous* reference resistance is used even
//! though software has already recorded the new selection.

use crate::types::ExternalContext;

/// Denominator floor below which the divider inversion is undefined
const MIN_DENOMINATOR_V: f64 = 1e-6;

/// E12 decade base values used for tolerance snapping
const E12_SERIES: [f64; 12] = [1.0, 1.2, 1.5, 1.8, 2.2, 2.7, 3.3, 3.9, 4.7, 5.6, 6.8, 8.2];

/// Invert the divider; `None` when the denominator or reference make
/// the result undefined (caller falls back to last known-good)
pub fn divider_resistance(v_out: f64, v_in: f64, reference_kohm: f64) -> Option<f64> {
    let denominator = v_in - v_out;
    if denominator > MIN_DENOMINATOR_V && reference_kohm > 0.0 {
        Some(v_out * reference_kohm / denominator)
    } else {
        None
    }
}

/// Reference resistance to use for the divider inversion
///
/// The previous selection applies while the MUX mute window is active or
/// the post-switch settle counter has not run out; the electrical channel
/// lags the recorded selection.
pub fn effective_reference_kohm(
    ctx: &ExternalContext,
    mux_mute_active: bool,
    post_switch_settle: u32,
) -> f64 {
    if mux_mute_active || post_switch_settle > 0 {
        ctx.previous_reference_kohm
    } else {
        ctx.current_reference_kohm
    }
}

/// Snap a resistance to the nearest E12 decade value when within 5% of
/// it, rounding to two decimals either way
///
/// Advisory display behavior only: recorded samples keep raw precision.
pub fn snap_to_series(resistance_kohm: f64) -> f64 {
    let r = resistance_kohm.max(0.0);
    if r == 0.0 {
        return 0.0;
    }
    let exp = r.log10().floor() as i32;
    let mut nearest = r;
    let mut best_delta = f64::INFINITY;
    for d in (exp - 1)..=(exp + 1) {
        let scale = 10f64.powi(d);
        for base in E12_SERIES {
            let candidate = base * scale;
            let delta = (candidate - r).abs();
            if delta < best_delta {
                best_delta = delta;
                nearest = candidate;
            }
        }
    }
    if nearest > 0.0 && (r - nearest).abs() <= 0.05 * nearest {
        round2(nearest)
    } else {
        round2(r)
    }
}

/// Reject a sample that jumps implausibly far from the last accepted
/// value (more than 10%, with a 0.5 kΩ floor), returning the last value
/// instead
///
/// Optional conditioning; off by default in the pipeline configuration.
pub fn reject_outlier(last_kohm: Option<f64>, resistance_kohm: f64) -> f64 {
    match last_kohm {
        Some(last) if (resistance_kohm - last).abs() > (0.10 * last).max(0.5) => last,
        _ => resistance_kohm,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
