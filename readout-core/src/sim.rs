//! # Simulated Device Module
//!
//! A software [`DeviceSession`] with the same channel arithmetic, tone
//! quantization and tagged packet layout as the hardware. The signal path is
//! modelled as a gain, an optional amplitude ripple across each output
//! channel and a linear phase `delay * frequency`.
//!
//! Used by the tests and by the command-line front-end when no hardware is
//! attached.

use std::f64::consts::PI;

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::{SimulationConfig, DECIMATION_RANGE};
use crate::device::{DeviceSession, Packet, RawPacketBatch, ToneRoute, PACKET_WIDTH, STREAM_SLOTS, TAG_SLOT};
use crate::error::{DeviceError, DeviceResult};

/// Integer value of a full-scale I or Q sample.
pub const FULL_SCALE: f64 = 30000.0;

#[derive(Debug, Clone, Copy)]
struct SimTone {
    frequency: f64,
    amplitude: f64,
    phase: f64,
}

/// In-memory stand-in for the readout hardware.
#[derive(Debug)]
pub struct SimulatedDevice {
    config: SimulationConfig,
    mixer: f64,
    rng: StdRng,
    tones: Vec<SimTone>,
    routes: Vec<ToneRoute>,
    transactions: usize,
    decimation: u32,
    fail_after: Option<usize>,
    transfers_done: usize,
    program_calls: usize,
}

impl SimulatedDevice {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            mixer: config.mixer_frequency,
            rng: StdRng::seed_from_u64(config.seed),
            tones: Vec::new(),
            routes: Vec::new(),
            transactions: config.transactions.max(1),
            decimation: *DECIMATION_RANGE.start(),
            fail_after: None,
            transfers_done: 0,
            program_calls: 0,
            config,
        }
    }

    /// Default device whose signal path is a pure delay.
    pub fn with_delay(delay: f64) -> Self {
        Self::new(SimulationConfig {
            delay,
            ..Default::default()
        })
    }

    /// Makes every transfer after the first `transfers` fail.
    pub fn fail_after(mut self, transfers: usize) -> Self {
        self.fail_after = Some(transfers);
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Number of successful `program_tones` calls so far.
    pub fn program_calls(&self) -> usize {
        self.program_calls
    }

    /// Number of successful `transfer` calls so far.
    pub fn transfers_done(&self) -> usize {
        self.transfers_done
    }

    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    /// Complex response of the simulated signal path at `frequency`.
    pub fn response(&self, frequency: f64) -> Complex64 {
        let fc = self.config.fc_out;
        let center = self.out_channel_center(self.out_freq_to_channel(frequency));
        let ripple = 1.0 + self.config.ripple * (2.0 * PI * (frequency - center) / fc).cos();
        Complex64::from_polar(self.config.gain * ripple, self.config.delay * frequency)
    }

    fn quantize(&self, frequency: f64) -> f64 {
        if self.config.df > 0.0 {
            self.config.df * (frequency / self.config.df).round()
        } else {
            frequency
        }
    }
}

fn uniform_noise(rng: &mut StdRng, peak: f64) -> f64 {
    if peak > 0.0 {
        rng.gen_range(-peak..=peak)
    } else {
        0.0
    }
}

/// Builds one row: every tone routed to `tag` writes its I/Q pair.
fn fill_packet(tag: usize, routes: &[ToneRoute], levels: &[Complex64], noise: f64, rng: &mut StdRng) -> Packet {
    let mut packet = [0; PACKET_WIDTH];
    packet[TAG_SLOT] = tag as i32;
    for (route, level) in routes.iter().zip(levels) {
        if route.transaction as usize != tag {
            continue;
        }
        let i = level.re + uniform_noise(rng, noise);
        let q = level.im + uniform_noise(rng, noise);
        packet[2 * route.stream] = i.round() as i32;
        packet[2 * route.stream + 1] = q.round() as i32;
    }
    packet
}

impl DeviceSession for SimulatedDevice {
    fn program_tones(
        &mut self,
        frequencies: &[f64],
        amplitudes: &[f64],
        phases: &[f64],
    ) -> DeviceResult<Vec<f64>> {
        let actual: Vec<f64> = frequencies.iter().map(|&f| self.quantize(f)).collect();
        let channels: Vec<i64> = actual.iter().map(|&f| self.out_freq_to_channel(f)).collect();
        let mut sorted = channels.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != channels.len() {
            return Err(DeviceError::ChannelCollision { channels });
        }

        self.tones = actual
            .iter()
            .zip(amplitudes)
            .zip(phases)
            .map(|((&frequency, &amplitude), &phase)| SimTone {
                frequency,
                amplitude,
                phase,
            })
            .collect();
        self.routes.clear();
        self.program_calls += 1;
        Ok(actual)
    }

    fn prepare_readout(&mut self, tone_frequencies: &[f64], decimation: u32) -> DeviceResult<Vec<ToneRoute>> {
        if !DECIMATION_RANGE.contains(&decimation) {
            return Err(DeviceError::InvalidDecimation(decimation));
        }
        if tone_frequencies.len() != self.tones.len() {
            return Err(DeviceError::Hardware(format!(
                "Readout requested for {} tones, {} programmed",
                tone_frequencies.len(),
                self.tones.len()
            )));
        }
        self.decimation = decimation;
        self.routes = (0..tone_frequencies.len())
            .map(|i| ToneRoute {
                transaction: (i / STREAM_SLOTS) as i32,
                stream: i % STREAM_SLOTS,
            })
            .collect();
        let groups = tone_frequencies.len().div_ceil(STREAM_SLOTS);
        self.transactions = self.config.transactions.max(groups).max(1);
        Ok(self.routes.clone())
    }

    fn transfer(&mut self, transfer_count: usize, samples_per_transfer: usize) -> DeviceResult<RawPacketBatch> {
        if let Some(limit) = self.fail_after {
            if self.transfers_done >= limit {
                return Err(DeviceError::TransferFailed(format!(
                    "simulated failure after {} transfers",
                    limit
                )));
            }
        }
        if self.routes.is_empty() && !self.tones.is_empty() {
            return Err(DeviceError::Hardware("Readout not prepared".into()));
        }

        let levels: Vec<Complex64> = self
            .tones
            .iter()
            .map(|t| self.response(t.frequency) * Complex64::from_polar(t.amplitude * FULL_SCALE, t.phase))
            .collect();

        let noise = self.config.noise;
        let transactions = self.transactions;
        let routes = &self.routes;
        let rng = &mut self.rng;
        let mut transfers = Vec::with_capacity(transfer_count);
        for it in 0..transfer_count {
            // Each transfer starts at a different point of the tag cycle
            let start = rng.gen_range(0..transactions);
            let rows = (0..samples_per_transfer)
                .map(|j| fill_packet((start + j) % transactions, routes, &levels, noise, rng))
                .collect();
            transfers.push(rows);
            debug!(transfer = it, samples = samples_per_transfer, "simulated transfer");
        }
        self.transfers_done += 1;
        Ok(RawPacketBatch::new(transfers))
    }

    fn mixer_frequency(&self) -> f64 {
        self.mixer
    }

    fn set_mixer_frequency(&mut self, frequency: f64) -> DeviceResult<()> {
        if !frequency.is_finite() {
            return Err(DeviceError::Hardware(format!("Invalid mixer frequency {}", frequency)));
        }
        self.mixer = frequency;
        Ok(())
    }

    fn in_freq_to_channel(&self, frequency: f64) -> i64 {
        ((frequency - self.mixer) / self.config.fc_in).round() as i64
    }

    fn in_channel_center(&self, channel: i64) -> f64 {
        self.mixer + channel as f64 * self.config.fc_in
    }

    fn out_freq_to_channel(&self, frequency: f64) -> i64 {
        ((frequency - self.mixer) / self.config.fc_out).round() as i64
    }

    fn out_channel_center(&self, channel: i64) -> f64 {
        self.mixer + channel as f64 * self.config.fc_out
    }

    fn fc_in(&self) -> f64 {
        self.config.fc_in
    }

    fn fc_out(&self) -> f64 {
        self.config.fc_out
    }
}
