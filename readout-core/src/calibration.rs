//! # Calibration Module
//!
//! Builds a frequency-dependent amplitude/phase calibration from a wide
//! sweep and applies it to later sweeps.
//!
//! The response is expected to jump at the edges of both the input and the
//! output channels, so the band is cut at every such edge and each piece
//! gets its own interpolant. No interpolant ever spans a channel edge.

use std::f64::consts::PI;

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CalibrationParams, SweepParams};
use crate::device::DeviceSession;
use crate::error::{CalibrationError, ReadoutError, ReadoutResult};
use crate::interp::ComplexInterpolant;
use crate::scan::Scanner;
use crate::sweep::{Spectrum, SweepResult, ToneSet};

/// Relative tolerance under which two boundaries count as the same.
const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// A piecewise calibration over `[frequency_range.0, frequency_range.1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub mixer_frequency: f64,
    /// Strictly increasing partition edges (MHz)
    pub boundary_frequencies: Vec<f64>,
    /// One interpolant per pair of adjacent boundaries
    pub interpolants: Vec<ComplexInterpolant>,
    pub frequency_range: (f64, f64),
    /// Delay removed from the source sweep before fitting
    pub nominal_delay: Option<f64>,
    pub source_sweep: SweepResult,
}

/// Channel edges of one grid from the channel holding `f_min` to the one
/// holding `f_max`, as `start, start + fc, ...` up to the first value at or
/// past the far edge.
fn grid_edges(start: f64, end: f64, fc: f64) -> Vec<f64> {
    let mut edges = Vec::new();
    let mut freq = start;
    loop {
        edges.push(freq);
        freq += fc;
        if freq >= end {
            edges.push(freq);
            break;
        }
    }
    edges
}

/// Merges edge lists, sorts them, drops near-duplicates and trims to one
/// boundary below `f_min` and one at or above `f_max`.
fn merge_boundaries(mut edges: Vec<f64>, f_min: f64, f_max: f64, tolerance: f64) -> Vec<f64> {
    edges.sort_by(f64::total_cmp);
    edges.dedup_by(|b, a| (*b - *a).abs() <= tolerance);

    let i0 = edges.partition_point(|&f| f < f_min).saturating_sub(1);
    let i1 = (edges.partition_point(|&f| f < f_max) + 1).min(edges.len());
    edges[i0..i1].to_vec()
}

/// Partitions a spectrum at `boundaries` and fits one interpolant per piece
/// from the points strictly inside it.
fn fit_partitions(spectrum: &Spectrum, boundaries: &[f64]) -> ReadoutResult<Vec<ComplexInterpolant>> {
    if boundaries.len() < 2 {
        return Err(CalibrationError::TooFewBoundaries(boundaries.len()).into());
    }
    boundaries
        .windows(2)
        .map(|pair| {
            let (lower, upper) = (pair[0], pair[1]);
            let inside: Vec<usize> = (0..spectrum.len())
                .filter(|&i| lower < spectrum.frequencies[i] && spectrum.frequencies[i] < upper)
                .collect();
            if inside.is_empty() {
                return Err(CalibrationError::EmptyPartition { lower, upper }.into());
            }
            debug!(lower, upper, points = inside.len(), "fitting partition");
            ComplexInterpolant::new(
                inside.iter().map(|&i| spectrum.frequencies[i]).collect(),
                inside.iter().map(|&i| spectrum.value(i)).collect(),
            )
        })
        .collect()
}

impl<D: DeviceSession> Scanner<'_, D> {
    /// Frequencies at which the measured response may be discontinuous.
    ///
    /// Sets the mixer to `mixer_frequency`, then walks the input and output
    /// channel grids across `[f_min, f_max]`.
    ///
    /// # Returns
    /// * Sorted, strictly increasing boundaries whose first element is at or
    ///   below `f_min` and last at or above `f_max`
    pub fn make_boundary_list(&mut self, mixer_frequency: f64, f_min: f64, f_max: f64) -> ReadoutResult<Vec<f64>> {
        if !(f_min < f_max) {
            return Err(ReadoutError::Configuration(format!(
                "Empty frequency range [{}, {}]",
                f_min, f_max
            )));
        }
        self.device.set_mixer_frequency(mixer_frequency)?;

        let device = &*self.device;
        let (fc_in, fc_out) = (device.fc_in(), device.fc_out());
        if !(fc_in > 0.0 && fc_out > 0.0) {
            return Err(ReadoutError::Configuration(format!(
                "Channel widths must be positive, got {} and {}",
                fc_in, fc_out
            )));
        }

        let mut edges = grid_edges(
            device.in_channel_center(device.in_freq_to_channel(f_min)) - fc_in / 2.0,
            device.in_channel_center(device.in_freq_to_channel(f_max)) + fc_in / 2.0,
            fc_in,
        );
        edges.extend(grid_edges(
            device.out_channel_center(device.out_freq_to_channel(f_min)) - fc_out / 2.0,
            device.out_channel_center(device.out_freq_to_channel(f_max)) + fc_out / 2.0,
            fc_out,
        ));

        let tolerance = BOUNDARY_TOLERANCE * fc_in.max(fc_out);
        Ok(merge_boundaries(edges, f_min, f_max, tolerance))
    }

    /// Measures the response across `[f_min, f_max]` and fits a calibration.
    ///
    /// Tones one output channel apart cover the range with a channel of
    /// margin on each side, each swept across nearly a full channel. Phases
    /// are drawn from a seeded generator so repeated builds match.
    pub fn make_calibration(
        &mut self,
        mixer_frequency: f64,
        f_min: f64,
        f_max: f64,
        params: &CalibrationParams,
    ) -> ReadoutResult<Calibration> {
        if params.nf == 0 {
            return Err(ReadoutError::Configuration("nf must be at least 1".into()));
        }
        let boundaries = self.make_boundary_list(mixer_frequency, f_min, f_max)?;

        let device = &*self.device;
        let fc_out = device.fc_out();
        let fc_max = device.fc_in().max(fc_out);
        let first = device.out_channel_center(device.out_freq_to_channel(f_min)) - fc_max;
        let last = device.out_channel_center(device.out_freq_to_channel(f_max)) + fc_max;
        // Half-open range; the small slack keeps float error from adding a tone
        let n_tones = ((last - first) / fc_out - 1e-9).ceil().max(0.0) as usize;
        let frequencies: Vec<f64> = (0..n_tones).map(|i| first + fc_out * i as f64).collect();

        let amplitudes = vec![params.total_amplitude / n_tones.max(1) as f64; n_tones];
        let mut rng = StdRng::seed_from_u64(params.rand_seed);
        let phases: Vec<f64> = (0..n_tones).map(|_| rng.gen_range(0.0..2.0 * PI)).collect();
        let tones = ToneSet::new(frequencies, amplitudes, phases)?;

        let sweep_params = SweepParams {
            bandwidth: fc_out * (1.0 - 1.0 / params.nf as f64),
            nf: params.nf,
            decimation: params.decimation,
            nt: params.nt,
            i_begin: params.i_begin,
            n_samples: params.n_samples,
            subtract_input_phase: true,
            retain_packets: false,
        };
        info!(tones = n_tones, boundaries = boundaries.len(), "calibration sweep");

        let mut sweep = self.fscan(&tones, &sweep_params)?;
        if let Some(delay) = params.nominal_delay {
            sweep = sweep.apply_delay(delay);
        }
        let interpolants = fit_partitions(&sweep.to_spectrum(), &boundaries)?;

        Ok(Calibration {
            mixer_frequency,
            boundary_frequencies: boundaries,
            interpolants,
            frequency_range: (f_min, f_max),
            nominal_delay: params.nominal_delay,
            source_sweep: sweep,
        })
    }
}

impl Calibration {
    /// Index of the partition used for `frequency`; frequencies outside the
    /// boundary list use the nearest end partition.
    pub fn partition_index(&self, frequency: f64) -> usize {
        let last = self.interpolants.len().saturating_sub(1);
        self.boundary_frequencies
            .partition_point(|&b| b < frequency)
            .saturating_sub(1)
            .min(last)
    }

    /// Reference response of the system at `frequency`.
    pub fn reference(&self, frequency: f64) -> Complex64 {
        self.interpolants[self.partition_index(frequency)].eval(frequency)
    }

    /// Corrects a sweep for the system response.
    ///
    /// The calibration's nominal delay is removed from a copy of `sweep`
    /// first; a sweep that already carries a different delay is refused.
    /// Each sample is then scaled by `amplitude_max / |reference|` and
    /// rotated back by the reference phase. A zero or non-finite reference
    /// is an error rather than an infinite gain.
    ///
    /// # Returns
    /// * The corrected copy; `sweep` itself is untouched
    pub fn apply(&self, sweep: &SweepResult, amplitude_max: f64) -> ReadoutResult<SweepResult> {
        if self.interpolants.is_empty() {
            return Err(CalibrationError::TooFewBoundaries(self.boundary_frequencies.len()).into());
        }
        sweep.check_shape()?;

        let mut corrected = match self.nominal_delay {
            Some(delay) => sweep.clone().apply_delay(delay),
            None => sweep.clone(),
        };
        let expected = self.nominal_delay.unwrap_or(0.0);
        let found = corrected.delay_applied.unwrap_or(0.0);
        if (found - expected).abs() > 1e-12 * expected.abs().max(1.0) {
            return Err(CalibrationError::DelayConflict {
                expected: self.nominal_delay,
                found: sweep.delay_applied,
            }
            .into());
        }

        for row in 0..corrected.offset_count() {
            for tone in 0..corrected.tone_count() {
                let frequency = corrected.frequency_at(row, tone);
                let reference = self.reference(frequency);
                let magnitude = reference.norm();
                if !(magnitude.is_finite() && magnitude > 0.0) {
                    return Err(CalibrationError::DegenerateReference { frequency, magnitude }.into());
                }
                let x = corrected.samples[row][tone];
                let gain = amplitude_max / magnitude;
                corrected.samples[row][tone] = Complex64::from_polar(x.norm() * gain, x.arg() - reference.arg());
            }
        }
        Ok(corrected)
    }
}
