//! # Frequency Scan Module
//!
//! The [`Scanner`] sequences tone programming, readout preparation and
//! transfers on a borrowed [`DeviceSession`].
//!
//! ## Sweep cycle
//! For every offset of an evenly spaced grid centered on zero:
//! 1. Re-program the tones at base frequency + offset
//! 2. Point the readout path at the new tone positions
//! 3. Read, unpack and average one complex value per tone
//!
//! Steps never overlap, and the first device error aborts the sweep. A
//! partially completed sweep cannot be resumed; start again from scratch.

use crossbeam_channel::Sender;
use num_complex::Complex64;
use tracing::{debug, info};

use crate::config::{SweepParams, DECIMATION_RANGE};
use crate::device::{DeviceSession, RawPacketBatch, ToneRoute};
use crate::error::{ReadoutError, ReadoutResult};
use crate::sweep::{offset_grid, SweepResult, ToneSet};
use crate::unpack::{self, SamplesByTransferTone, UnpackOptions};

/// Progress notice sent after each completed sweep step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanProgress {
    /// Steps completed so far (1-based)
    pub step: usize,
    pub total: usize,
    /// Offset just measured (MHz)
    pub offset: f64,
}

/// Tones currently programmed on the device.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneState {
    pub requested: Vec<f64>,
    /// Frequencies actually programmed after quantization
    pub frequencies: Vec<f64>,
    pub amplitudes: Vec<f64>,
    pub phases: Vec<f64>,
    pub out_channels: Vec<i64>,
}

/// Drives scans on an exclusively borrowed device session.
pub struct Scanner<'d, D: DeviceSession> {
    pub(crate) device: &'d mut D,
    tones: Option<ToneState>,
    routes: Vec<ToneRoute>,
    packets: Option<RawPacketBatch>,
    retained_packets: Vec<RawPacketBatch>,
    progress: Option<Sender<ScanProgress>>,
    pub(crate) delay_scan: Option<SweepResult>,
}

impl<'d, D: DeviceSession> Scanner<'d, D> {
    pub fn new(device: &'d mut D) -> Self {
        Self {
            device,
            tones: None,
            routes: Vec::new(),
            packets: None,
            retained_packets: Vec::new(),
            progress: None,
            delay_scan: None,
        }
    }

    /// Reports every sweep step on `sender`. Sends never block; a full or
    /// closed channel just drops the notice.
    pub fn with_progress(mut self, sender: Sender<ScanProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn device(&self) -> &D {
        &*self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut *self.device
    }

    pub fn tones(&self) -> Option<&ToneState> {
        self.tones.as_ref()
    }

    pub fn routes(&self) -> &[ToneRoute] {
        &self.routes
    }

    /// The raw batch from the most recent read.
    pub fn last_packets(&self) -> Option<&RawPacketBatch> {
        self.packets.as_ref()
    }

    /// Raw batches kept by the last sweep run with `retain_packets`.
    pub fn retained_packets(&self) -> &[RawPacketBatch] {
        &self.retained_packets
    }

    pub fn take_retained_packets(&mut self) -> Vec<RawPacketBatch> {
        std::mem::take(&mut self.retained_packets)
    }

    /// Programs tones near the requested frequencies.
    ///
    /// Two tones sharing an output channel are rejected before anything is
    /// sent to the device. Any previous readout routing is discarded.
    ///
    /// # Returns
    /// * The frequencies actually programmed
    pub fn set_tones(&mut self, frequencies: &[f64], amplitudes: &[f64], phases: &[f64]) -> ReadoutResult<&[f64]> {
        if frequencies.len() != amplitudes.len() || frequencies.len() != phases.len() {
            return Err(ReadoutError::Configuration(format!(
                "Tone lengths differ: {} frequencies, {} amplitudes, {} phases",
                frequencies.len(),
                amplitudes.len(),
                phases.len()
            )));
        }
        let out_channels = self.distinct_out_channels(frequencies)?;

        self.routes.clear();
        self.tones = None;
        let actual = self.device.program_tones(frequencies, amplitudes, phases)?;
        let state = self.tones.insert(ToneState {
            requested: frequencies.to_vec(),
            frequencies: actual,
            amplitudes: amplitudes.to_vec(),
            phases: phases.to_vec(),
            out_channels,
        });
        Ok(&state.frequencies)
    }

    /// Output channel of every tone, rejecting two tones in one channel.
    fn distinct_out_channels(&self, frequencies: &[f64]) -> ReadoutResult<Vec<i64>> {
        let out_channels: Vec<i64> = frequencies
            .iter()
            .map(|&f| self.device.out_freq_to_channel(f))
            .collect();
        let mut unique = out_channels.clone();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() != out_channels.len() {
            return Err(ReadoutError::Configuration(format!(
                "Output tones map to channels {:?}, which are not unique",
                out_channels
            )));
        }
        Ok(out_channels)
    }

    /// Prepares the readout path for the tones set by [`Scanner::set_tones`].
    pub fn prep_read(&mut self, decimation: u32) -> ReadoutResult<&[ToneRoute]> {
        if !DECIMATION_RANGE.contains(&decimation) {
            return Err(ReadoutError::Configuration(format!(
                "Decimation {} outside [2, 250]",
                decimation
            )));
        }
        let tones = self
            .tones
            .as_ref()
            .ok_or_else(|| ReadoutError::Configuration("No tones set before prep_read".into()))?;
        let routes = self.device.prepare_readout(&tones.frequencies, decimation)?;
        if routes.len() != tones.frequencies.len() {
            return Err(ReadoutError::Configuration(format!(
                "Device returned {} routes for {} tones",
                routes.len(),
                tones.frequencies.len()
            )));
        }
        self.routes = routes;
        Ok(&self.routes)
    }

    fn read(&mut self, nt: usize, n_samples: usize) -> ReadoutResult<&RawPacketBatch> {
        if self.routes.is_empty() {
            return Err(ReadoutError::Configuration("Readout not prepared".into()));
        }
        let batch = self.device.transfer(nt, n_samples)?;
        Ok(self.packets.insert(batch))
    }

    fn tone_phases(&self) -> &[f64] {
        self.tones.as_ref().map(|t| t.phases.as_slice()).unwrap_or(&[])
    }

    /// Reads `nt` transfers and unpacks them per transfer and tone.
    pub fn read_and_unpack(
        &mut self,
        nt: usize,
        n_samples: usize,
        options: UnpackOptions,
    ) -> ReadoutResult<SamplesByTransferTone> {
        self.read(nt, n_samples)?;
        match &self.packets {
            Some(batch) => unpack::unpack(batch, &self.routes, self.tone_phases(), options),
            None => Err(ReadoutError::Configuration("No packets read".into())),
        }
    }

    /// Reads `nt` transfers and averages them to one value per tone.
    pub fn read_and_unpack_averaged(
        &mut self,
        nt: usize,
        n_samples: usize,
        options: UnpackOptions,
    ) -> ReadoutResult<Vec<Complex64>> {
        let samples = self.read_and_unpack(nt, n_samples, options)?;
        unpack::average(&samples, &self.routes)
    }

    /// Sweeps every tone across `params.bandwidth` by moving the tones
    /// themselves; the mixer is left alone.
    ///
    /// # Arguments
    /// * `tones` - Base frequencies, amplitudes and phases
    /// * `params` - Grid size, readout and transfer settings
    ///
    /// # Returns
    /// * A sweep with one averaged sample per (offset, tone), tagged with the
    ///   mixer frequency read back from the device
    pub fn fscan(&mut self, tones: &ToneSet, params: &SweepParams) -> ReadoutResult<SweepResult> {
        params.validate()?;
        if tones.is_empty() {
            return Err(ReadoutError::Configuration("Sweep needs at least one tone".into()));
        }

        let offsets = offset_grid(params.bandwidth, params.nf);
        // Every step is checked up front so a collision late in the grid
        // leaves the device untouched.
        for &offset in &offsets {
            self.distinct_out_channels(&tones.shifted(offset))?;
        }
        let options = UnpackOptions {
            i_begin: params.i_begin,
            subtract_input_phase: params.subtract_input_phase,
        };
        info!(
            tones = tones.len(),
            points = offsets.len(),
            bandwidth = params.bandwidth,
            "starting frequency sweep"
        );

        self.retained_packets.clear();
        let mut samples = Vec::with_capacity(offsets.len());
        for (step, &offset) in offsets.iter().enumerate() {
            self.set_tones(&tones.shifted(offset), tones.amplitudes(), tones.phases())?;
            self.prep_read(params.decimation)?;
            let row = self.read_and_unpack_averaged(params.nt, params.n_samples, options)?;
            if params.retain_packets {
                if let Some(batch) = &self.packets {
                    self.retained_packets.push(batch.clone());
                }
            }
            debug!(step, offset, "sweep step done");
            samples.push(row);

            if let Some(sender) = &self.progress {
                let _ = sender.try_send(ScanProgress {
                    step: step + 1,
                    total: offsets.len(),
                    offset,
                });
            }
        }

        let result = SweepResult {
            mixer_frequency: self.device.mixer_frequency(),
            tone_frequencies: tones.frequencies().to_vec(),
            tone_amplitudes: tones.amplitudes().to_vec(),
            frequency_offsets: offsets,
            samples,
            delay_applied: None,
        };
        info!(mixer = result.mixer_frequency, "frequency sweep complete");
        Ok(result)
    }
}
