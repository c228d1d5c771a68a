//! # Scan Configuration Module
//!
//! Parameter sets for sweeps, delay measurement, calibration and the
//! simulated device. Every struct carries working defaults and can be
//! loaded from JSON with any field omitted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReadoutError, ReadoutResult};

/// Supported decimation range of the readout path.
pub const DECIMATION_RANGE: std::ops::RangeInclusive<u32> = 2..=250;

/// Output amplitude the calibration normalises to.
pub const DEFAULT_AMPLITUDE_MAX: f64 = 30000.0;

/// Settings for a single frequency sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepParams {
    /// Width of the offset grid (MHz)
    pub bandwidth: f64,
    /// Number of offsets in the grid
    pub nf: usize,
    /// Readout decimation, in [2, 250]
    pub decimation: u32,
    /// Transfers per offset
    pub nt: usize,
    /// Leading samples dropped from each transfer
    pub i_begin: usize,
    /// Samples per transfer
    pub n_samples: usize,
    pub subtract_input_phase: bool,
    /// Keep every raw batch read during the sweep
    pub retain_packets: bool,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self {
            bandwidth: 1.0,
            nf: 50,
            decimation: 2,
            nt: 1,
            i_begin: 200,
            n_samples: 10000,
            subtract_input_phase: true,
            retain_packets: false,
        }
    }
}

impl SweepParams {
    /// Rejects parameter combinations the hardware cannot run.
    pub fn validate(&self) -> ReadoutResult<()> {
        if self.nf == 0 {
            return Err(ReadoutError::Configuration("nf must be at least 1".into()));
        }
        if self.nt == 0 {
            return Err(ReadoutError::Configuration("nt must be at least 1".into()));
        }
        if !DECIMATION_RANGE.contains(&self.decimation) {
            return Err(ReadoutError::Configuration(format!(
                "Decimation {} outside [2, 250]",
                self.decimation
            )));
        }
        if self.n_samples <= self.i_begin {
            return Err(ReadoutError::Configuration(format!(
                "n_samples {} leaves nothing after i_begin {}",
                self.n_samples, self.i_begin
            )));
        }
        if !self.bandwidth.is_finite() || self.bandwidth < 0.0 {
            return Err(ReadoutError::Configuration(format!(
                "Bandwidth {} is not a finite non-negative width",
                self.bandwidth
            )));
        }
        Ok(())
    }
}

/// Settings for measuring the nominal delay on one output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayParams {
    pub nf: usize,
    pub nt: usize,
    pub decimation: u32,
    pub i_begin: usize,
    pub n_samples: usize,
    /// Scan width; `None` uses a hundredth of the output channel width
    pub bandwidth: Option<f64>,
    pub amplitude: f64,
    /// Unwrap direction (`1.0` or `-1.0`); `None` guesses it from the data,
    /// which fails once the phase moves more than π per point
    pub unwrap_sign: Option<f64>,
}

impl Default for DelayParams {
    fn default() -> Self {
        Self {
            nf: 20,
            nt: 1,
            decimation: 32,
            i_begin: 500,
            n_samples: 10000,
            bandwidth: None,
            amplitude: 0.9,
            unwrap_sign: None,
        }
    }
}

/// Settings for building a calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// Points measured across each output channel
    pub nf: usize,
    pub nt: usize,
    pub decimation: u32,
    pub i_begin: usize,
    pub n_samples: usize,
    /// Seed for the random tone phases
    pub rand_seed: u64,
    /// Delay removed from the raw sweep before fitting
    pub nominal_delay: Option<f64>,
    /// Summed amplitude shared by all tones
    pub total_amplitude: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            nf: 100,
            nt: 10,
            decimation: 2,
            i_begin: 500,
            n_samples: 10000,
            rand_seed: 1234991,
            nominal_delay: None,
            total_amplitude: 0.9,
        }
    }
}

/// Behaviour of the simulated device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Input channel width (MHz)
    pub fc_in: f64,
    /// Output channel width (MHz)
    pub fc_out: f64,
    /// Tone frequency quantum (MHz)
    pub df: f64,
    pub mixer_frequency: f64,
    /// Phase slope of the simulated signal path (radians per MHz)
    pub delay: f64,
    /// Linear gain of the signal path
    pub gain: f64,
    /// Fractional amplitude ripple across each output channel
    pub ripple: f64,
    /// Peak of the uniform noise added to each I and Q value
    pub noise: f64,
    /// Number of transactions rows are spread over
    pub transactions: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fc_in: 2.0,
            fc_out: 4.0,
            df: 1e-6,
            mixer_frequency: 0.0,
            delay: 0.05,
            gain: 1.0,
            ripple: 0.0,
            noise: 0.0,
            transactions: 2,
            seed: 7,
        }
    }
}

/// Everything a scan session reads from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub sweep: SweepParams,
    pub delay: DelayParams,
    pub calibration: CalibrationParams,
    pub simulation: SimulationConfig,
    /// Output amplitude for calibrated sweeps
    pub amplitude_max: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sweep: SweepParams::default(),
            delay: DelayParams::default(),
            calibration: CalibrationParams::default(),
            simulation: SimulationConfig::default(),
            amplitude_max: DEFAULT_AMPLITUDE_MAX,
        }
    }
}

impl ScanConfig {
    /// Parses a JSON config, filling omitted fields with defaults.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> ReadoutResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ReadoutError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text).map_err(|e| {
            ReadoutError::Configuration(format!("Cannot parse {}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ScanConfig::from_json_str(r#"{"calibration": {"nf": 40}, "simulation": {"delay": 0.1}}"#).unwrap();
        assert_eq!(config.calibration.nf, 40);
        assert_eq!(config.calibration.rand_seed, 1234991);
        assert_eq!(config.simulation.delay, 0.1);
        assert_eq!(config.delay, DelayParams::default());
        assert_eq!(config.amplitude_max, DEFAULT_AMPLITUDE_MAX);
    }

    #[test]
    fn test_round_trip() {
        let config = ScanConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(ScanConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn test_sweep_validation() {
        assert!(SweepParams::default().validate().is_ok());
        let bad = [
            SweepParams { decimation: 1, ..Default::default() },
            SweepParams { decimation: 251, ..Default::default() },
            SweepParams { nf: 0, ..Default::default() },
            SweepParams { nt: 0, ..Default::default() },
            SweepParams { n_samples: 100, i_begin: 100, ..Default::default() },
            SweepParams { bandwidth: f64::NAN, ..Default::default() },
        ];
        for params in bad {
            assert!(matches!(params.validate(), Err(ReadoutError::Configuration(_))), "{params:?}");
        }
    }
}
