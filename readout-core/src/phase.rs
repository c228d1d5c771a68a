//! # Phase Unwrapping Module
//!
//! Turns phases produced by a four-quadrant arctangent back into a continuous
//! sequence, assuming the underlying phase moves in one direction only.
//!
//! ## Limitations
//! - A step of more than 2π between neighbours is not detected; the scan
//!   must be fine enough that the true phase moves less than one cycle
//!   per point.

use std::f64::consts::PI;

const TWO_PI: f64 = 2.0 * PI;

/// Unwraps a monotonic phase sequence.
///
/// Scanning left to right, whenever a value is smaller than its predecessor,
/// it and every later value are shifted up by 2π. With `sign = -1.0` the
/// sequence is treated as decreasing (negated before and after the scan).
///
/// # Arguments
/// * `phases` - Wrapped phases in radians
/// * `sign` - `1.0` for increasing phase, `-1.0` for decreasing
///
/// # Returns
/// * Unwrapped phases, same length as the input
pub fn unwrap_phases(phases: &[f64], sign: f64) -> Vec<f64> {
    let sign = if sign < 0.0 { -1.0 } else { 1.0 };
    let mut unwrapped: Vec<f64> = phases.iter().map(|p| sign * p).collect();

    let mut shift = 0.0;
    for i in 1..unwrapped.len() {
        // Compare against the predecessor before the running shift is applied
        // to it, so each drop adds exactly one extra cycle.
        if phases[i - 1] * sign > phases[i] * sign {
            shift += TWO_PI;
        }
        unwrapped[i] += shift;
    }

    unwrapped.iter_mut().for_each(|p| *p *= sign);
    unwrapped
}

/// Wraps a phase into (-π, π].
pub fn wrap_phase(phase: f64) -> f64 {
    let mut wrapped = phase % TWO_PI;
    if wrapped > PI {
        wrapped -= TWO_PI;
    } else if wrapped <= -PI {
        wrapped += TWO_PI;
    }
    wrapped
}

/// Returns the direction (`1.0` or `-1.0`) most steps of a wrapped phase
/// sequence move in.
///
/// Each step is wrapped into (-π, π] first, so a single 2π jump does not
/// count against the trend. Ties go to `1.0`.
pub fn dominant_direction(phases: &[f64]) -> f64 {
    let balance: i64 = phases
        .windows(2)
        .map(|w| wrap_phase(w[1] - w[0]))
        .map(|step| if step < 0.0 { -1 } else if step > 0.0 { 1 } else { 0 })
        .sum();
    if balance < 0 { -1.0 } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn congruent(a: f64, b: f64) -> bool {
        wrap_phase(a - b).abs() < 1e-9
    }

    #[test]
    fn test_increasing_ramp_unwraps() {
        let truth: Vec<f64> = (0..40).map(|i| 0.1 + 0.7 * i as f64).collect();
        let wrapped: Vec<f64> = truth.iter().map(|&p| wrap_phase(p)).collect();
        let unwrapped = unwrap_phases(&wrapped, 1.0);
        for (u, t) in unwrapped.iter().zip(&truth) {
            assert_abs_diff_eq!(*u, *t, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_decreasing_ramp_unwraps_with_negative_sign() {
        let truth: Vec<f64> = (0..40).map(|i| 2.0 - 0.45 * i as f64).collect();
        let wrapped: Vec<f64> = truth.iter().map(|&p| wrap_phase(p)).collect();
        let unwrapped = unwrap_phases(&wrapped, -1.0);
        for (u, t) in unwrapped.iter().zip(&truth) {
            assert_abs_diff_eq!(*u, *t, epsilon = 1e-9);
        }
        assert_eq!(dominant_direction(&wrapped), -1.0);
    }

    #[test]
    fn test_output_congruent_to_input() {
        let inputs = [3.0, -3.0, 1.0, 2.5, -0.2, -2.9, 3.1, 0.0];
        for sign in [1.0, -1.0] {
            let unwrapped = unwrap_phases(&inputs, sign);
            assert_eq!(unwrapped.len(), inputs.len());
            assert_eq!(unwrapped[0], inputs[0]);
            for (u, x) in unwrapped.iter().zip(&inputs) {
                assert!(congruent(*u, *x), "{u} vs {x}");
            }
        }
    }

    #[test]
    fn test_empty_and_single() {
        assert!(unwrap_phases(&[], 1.0).is_empty());
        assert_eq!(unwrap_phases(&[1.5], 1.0), vec![1.5]);
    }

    #[test]
    fn test_wrap_phase_range() {
        assert_abs_diff_eq!(wrap_phase(3.0 * PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_phase(-PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_phase(0.5), 0.5, epsilon = 1e-12);
    }
}
