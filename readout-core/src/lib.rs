// readout-core/src/lib.rs

//! The core logic for the microwave readout scanner.
//! This crate is responsible for frequency sweeps, packet unpacking,
//! delay estimation and amplitude/phase calibration. It is completely
//! headless: the hardware sits behind the `DeviceSession` trait.

pub mod calibration;
pub mod config;
pub mod delay;
pub mod device;
pub mod error;
pub mod interp;
pub mod phase;
pub mod scan;
pub mod sim;
pub mod sweep;
pub mod unpack;

pub use calibration::Calibration;
pub use config::ScanConfig;
pub use delay::DelayFit;
pub use device::{DeviceSession, RawPacketBatch, ToneRoute};
pub use error::{CalibrationError, DeviceError, ReadoutError, ReadoutResult};
pub use scan::{ScanProgress, Scanner};
pub use sim::SimulatedDevice;
pub use sweep::{Spectrum, SweepResult, ToneSet};
