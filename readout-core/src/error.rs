//! Error types for scanning and calibration.

use thiserror::Error;

/// Result type for scan and calibration operations
pub type ReadoutResult<T> = Result<T, ReadoutError>;

/// Result type for calls into a device session
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors raised by a device session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Two requested tones landed in the same output channel
    #[error("Output tones map to channels {channels:?}, which are not unique")]
    ChannelCollision { channels: Vec<i64> },

    /// Decimation outside the supported range
    #[error("Decimation {0} outside [2, 250]")]
    InvalidDecimation(u32),

    /// The sample transfer did not complete
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Tone or readout programming was rejected by the hardware
    #[error("Hardware error: {0}")]
    Hardware(String),
}

/// Errors raised while building or applying a calibration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// The sweep already carries a delay that conflicts with the calibration's
    #[error("Sweep already had a delay applied: expected total {expected:?}, found {found:?}")]
    DelayConflict {
        expected: Option<f64>,
        found: Option<f64>,
    },

    /// No spectrum points fell strictly between two boundaries
    #[error("No spectrum points between boundaries {lower} and {upper}")]
    EmptyPartition { lower: f64, upper: f64 },

    /// Too few points for a fit
    #[error("Need at least {needed} points, got {got}")]
    InsufficientPoints { needed: usize, got: usize },

    /// The reference response has no usable magnitude at this frequency
    #[error("Reference response at {frequency} MHz has magnitude {magnitude}")]
    DegenerateReference { frequency: f64, magnitude: f64 },

    /// The boundary list cannot define any partition
    #[error("Boundary list has {0} entries, need at least 2")]
    TooFewBoundaries(usize),
}

/// Errors surfaced by the scan and calibration core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadoutError {
    /// Invalid request caught before any hardware command
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Device failure during a sweep step
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Calibration state or data problem
    #[error("Calibration state error: {0}")]
    CalibrationState(#[from] CalibrationError),

    /// A tone's transaction tag never appeared in a transfer
    #[error("Transfer {transfer} has no samples for tone {tone} (transaction {transaction})")]
    EmptySelection {
        transfer: usize,
        tone: usize,
        transaction: i32,
    },
}

impl ReadoutError {
    /// Check if this error came from the device session
    pub fn is_device_error(&self) -> bool {
        matches!(self, ReadoutError::Device(_))
    }

    /// Check if this is a delay double-application
    pub fn is_delay_conflict(&self) -> bool {
        matches!(
            self,
            ReadoutError::CalibrationState(CalibrationError::DelayConflict { .. })
        )
    }
}
