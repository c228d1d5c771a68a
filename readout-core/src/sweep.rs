//! # Sweep Data Module
//!
//! Tone requests, sweep results and the operations that reshape them:
//! delay correction and flattening into a frequency-sorted spectrum.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{ReadoutError, ReadoutResult};

/// Requested tones: frequencies (MHz), amplitudes and phases (radians).
///
/// Amplitudes are passed through unchecked; keeping the summed output in
/// range is the caller's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneSet {
    frequencies: Vec<f64>,
    amplitudes: Vec<f64>,
    phases: Vec<f64>,
}

impl ToneSet {
    /// Builds a tone set, rejecting sequences of different length.
    pub fn new(frequencies: Vec<f64>, amplitudes: Vec<f64>, phases: Vec<f64>) -> ReadoutResult<Self> {
        if frequencies.len() != amplitudes.len() || frequencies.len() != phases.len() {
            return Err(ReadoutError::Configuration(format!(
                "Tone set lengths differ: {} frequencies, {} amplitudes, {} phases",
                frequencies.len(),
                amplitudes.len(),
                phases.len()
            )));
        }
        Ok(Self {
            frequencies,
            amplitudes,
            phases,
        })
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    pub fn phases(&self) -> &[f64] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Same amplitudes and phases with every frequency moved by `offset`.
    pub fn shifted(&self, offset: f64) -> Vec<f64> {
        self.frequencies.iter().map(|f| f + offset).collect()
    }
}

/// The outcome of one frequency sweep.
///
/// `samples[i][j]` is the averaged response of tone `j` at offset `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    /// Mixer setting during the sweep (MHz)
    pub mixer_frequency: f64,
    /// Base frequency of each tone (MHz)
    pub tone_frequencies: Vec<f64>,
    pub tone_amplitudes: Vec<f64>,
    /// Offsets applied to every tone, ascending and evenly spaced (MHz)
    pub frequency_offsets: Vec<f64>,
    pub samples: Vec<Vec<Complex64>>,
    /// Total delay removed so far, `None` until the first correction
    pub delay_applied: Option<f64>,
}

/// Frequency-sorted amplitude/phase points from a sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub frequencies: Vec<f64>,
    pub amplitudes: Vec<f64>,
    pub phases: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Complex value at point `i`.
    pub fn value(&self, i: usize) -> Complex64 {
        Complex64::from_polar(self.amplitudes[i], self.phases[i])
    }
}

/// Evenly spaced offsets from `-bandwidth/2` to `+bandwidth/2`, both ends
/// included.
pub fn offset_grid(bandwidth: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![-bandwidth / 2.0],
        n => {
            let step = bandwidth / (n - 1) as f64;
            (0..n).map(|i| -bandwidth / 2.0 + step * i as f64).collect()
        }
    }
}

impl SweepResult {
    pub fn tone_count(&self) -> usize {
        self.tone_frequencies.len()
    }

    pub fn offset_count(&self) -> usize {
        self.frequency_offsets.len()
    }

    /// Absolute frequency of tone `tone` at offset row `row`.
    pub fn frequency_at(&self, row: usize, tone: usize) -> f64 {
        self.tone_frequencies[tone] + self.frequency_offsets[row]
    }

    /// The samples of one tone across all offsets.
    pub fn tone_column(&self, tone: usize) -> Vec<Complex64> {
        self.samples.iter().map(|row| row[tone]).collect()
    }

    /// Checks that `samples` is `offsets x tones`.
    pub fn check_shape(&self) -> ReadoutResult<()> {
        let tones = self.tone_count();
        if self.samples.len() != self.offset_count() || self.samples.iter().any(|r| r.len() != tones) {
            return Err(ReadoutError::Configuration(format!(
                "Sweep samples are not {} x {}",
                self.offset_count(),
                tones
            )));
        }
        Ok(())
    }

    /// Removes the phase ramp of a linear delay.
    ///
    /// Every sample's angle is reduced by `delay * (tone frequency + offset)`
    /// with magnitude unchanged, and `delay` is added to `delay_applied`.
    /// Takes `self` by value; clone first to keep the uncorrected sweep.
    pub fn apply_delay(mut self, delay: f64) -> Self {
        self.delay_applied = Some(self.delay_applied.unwrap_or(0.0) + delay);
        for (row, offset) in self.samples.iter_mut().zip(&self.frequency_offsets) {
            for (x, base) in row.iter_mut().zip(&self.tone_frequencies) {
                let (magnitude, angle) = x.to_polar();
                *x = Complex64::from_polar(magnitude, angle - delay * (base + offset));
            }
        }
        self
    }

    /// Flattens the sweep into a spectrum sorted by absolute frequency.
    ///
    /// Points are laid out tone by tone before a stable sort, so equal
    /// frequencies keep that order.
    pub fn to_spectrum(&self) -> Spectrum {
        let mut points: Vec<(f64, Complex64)> = (0..self.tone_count())
            .flat_map(|tone| {
                (0..self.offset_count()).map(move |row| (self.frequency_at(row, tone), self.samples[row][tone]))
            })
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut spectrum = Spectrum {
            frequencies: Vec::with_capacity(points.len()),
            amplitudes: Vec::with_capacity(points.len()),
            phases: Vec::with_capacity(points.len()),
        };
        for (f, x) in points {
            spectrum.frequencies.push(f);
            spectrum.amplitudes.push(x.norm());
            spectrum.phases.push(x.arg());
        }
        spectrum
    }
}
