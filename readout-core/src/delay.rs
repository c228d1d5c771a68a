//! # Nominal Delay Module
//!
//! Estimates the signal-path delay as the slope of phase against frequency
//! over a narrow sweep around one output channel.
//!
//! The model is a single linear term: dispersion and any other non-linear
//! phase response are not fitted and will bias the estimate.

use linreg::linear_regression;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{DelayParams, SweepParams};
use crate::device::DeviceSession;
use crate::error::{CalibrationError, ReadoutResult};
use crate::phase::{dominant_direction, unwrap_phases};
use crate::scan::Scanner;
use crate::sweep::{SweepResult, ToneSet};

/// Linear fit of unwrapped phase against frequency offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayFit {
    /// Fitted slope, radians per MHz
    pub delay: f64,
    /// Fitted phase at zero offset
    pub intercept: f64,
    /// Unwrapped phases minus the fit, one per offset
    pub residuals: Vec<f64>,
}

/// Fits `phase = delay * offset + intercept` to one tone of a sweep.
///
/// Phases are unwrapped with `unwrap_sign` (`1.0` increasing, `-1.0`
/// decreasing). With `None` the direction most wrapped steps move in is
/// used, which is only right while the true step stays below π.
pub fn fit_delay(sweep: &SweepResult, tone: usize, unwrap_sign: Option<f64>) -> ReadoutResult<DelayFit> {
    let n = sweep.offset_count();
    if n < 2 {
        return Err(CalibrationError::InsufficientPoints { needed: 2, got: n }.into());
    }
    let phases: Vec<f64> = sweep.tone_column(tone).iter().map(|x| x.arg()).collect();
    let sign = unwrap_sign.unwrap_or_else(|| dominant_direction(&phases));
    let unwrapped = unwrap_phases(&phases, sign);

    let (delay, intercept): (f64, f64) =
        linear_regression::<_, _, f64>(&sweep.frequency_offsets, &unwrapped)
            .map_err(|_| CalibrationError::InsufficientPoints { needed: 2, got: n })?;

    let residuals = sweep
        .frequency_offsets
        .iter()
        .zip(&unwrapped)
        .map(|(df, phi)| phi - (delay * df + intercept))
        .collect();

    Ok(DelayFit {
        delay,
        intercept,
        residuals,
    })
}

impl<D: DeviceSession> Scanner<'_, D> {
    /// Measures the nominal delay on output channel `out_channel`.
    ///
    /// A single tone at the channel center is swept across
    /// `params.bandwidth` (a hundredth of the output channel width when
    /// unset) and the phase slope is returned.
    ///
    /// # Returns
    /// * The fit; the sweep behind it is kept on the scanner
    ///   ([`Scanner::delay_scan`])
    pub fn measure_nominal_delay(&mut self, out_channel: i64, params: &DelayParams) -> ReadoutResult<DelayFit> {
        let center = self.device.out_channel_center(out_channel);
        let bandwidth = params.bandwidth.unwrap_or(self.device.fc_out() / 100.0);
        let tones = ToneSet::new(vec![center], vec![params.amplitude], vec![0.0])?;
        let sweep_params = SweepParams {
            bandwidth,
            nf: params.nf,
            decimation: params.decimation,
            nt: params.nt,
            i_begin: params.i_begin,
            n_samples: params.n_samples,
            subtract_input_phase: true,
            retain_packets: false,
        };

        let sweep = self.fscan(&tones, &sweep_params)?;
        let fit = fit_delay(&sweep, 0, params.unwrap_sign)?;
        self.delay_scan = Some(sweep);

        let worst = fit.residuals.iter().fold(0.0_f64, |m, r| m.max(r.abs()));
        if worst > 0.5 {
            warn!(out_channel, worst, "large residual in delay fit");
        }
        info!(out_channel, delay = fit.delay, "measured nominal delay");
        Ok(fit)
    }

    /// The sweep behind the last delay measurement.
    pub fn delay_scan(&self) -> Option<&SweepResult> {
        self.delay_scan.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::wrap_phase;
    use crate::sweep::offset_grid;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64;

    fn ramp(slope: f64, base: f64) -> SweepResult {
        let offsets = offset_grid(4.0, 21);
        let samples = offsets
            .iter()
            .map(|df| vec![Complex64::from_polar(1.0, wrap_phase(slope * (base + df)))])
            .collect();
        SweepResult {
            mixer_frequency: 0.0,
            tone_frequencies: vec![base],
            tone_amplitudes: vec![0.9],
            frequency_offsets: offsets,
            samples,
            delay_applied: None,
        }
    }

    #[test]
    fn test_fit_recovers_positive_slope() {
        let fit = fit_delay(&ramp(1.3, 100.0), 0, None).unwrap();
        assert_abs_diff_eq!(fit.delay, 1.3, epsilon = 1e-9);
        assert!(fit.residuals.iter().all(|r| r.abs() < 1e-9));
    }

    #[test]
    fn test_fit_recovers_negative_slope() {
        let fit = fit_delay(&ramp(-0.9, 50.0), 0, None).unwrap();
        assert_abs_diff_eq!(fit.delay, -0.9, epsilon = 1e-9);
    }

    #[test]
    fn test_explicit_sign_handles_steps_past_pi() {
        // 4 rad per offset step: wrapped steps look like -2.28 rad
        let sweep = ramp(20.0, 10.0);
        let fit = fit_delay(&sweep, 0, Some(1.0)).unwrap();
        assert_abs_diff_eq!(fit.delay, 20.0, epsilon = 1e-9);

        let guessed = fit_delay(&sweep, 0, None).unwrap();
        assert!(guessed.delay < 0.0);
    }

    #[test]
    fn test_explicit_negative_sign() {
        let fit = fit_delay(&ramp(-20.0, 10.0), 0, Some(-1.0)).unwrap();
        assert_abs_diff_eq!(fit.delay, -20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fit_needs_two_points() {
        let mut sweep = ramp(1.0, 10.0);
        sweep.frequency_offsets.truncate(1);
        sweep.samples.truncate(1);
        assert!(fit_delay(&sweep, 0, None).is_err());
    }
}
