//! # Device Session Module
//!
//! The capability through which every scan talks to the readout hardware.
//! The channelizer, DDS programming and the raw transfer transport live
//! behind [`DeviceSession`]; this crate only sequences calls into it.
//!
//! A session is stateful (tone table, mixer, channel selection) and must be
//! exclusively owned by whichever scan is running on it. The scanner holds it
//! by `&mut` for its whole lifetime.

use serde::{Deserialize, Serialize};

use crate::error::DeviceResult;

/// Number of stream slots carried by each packet.
pub const STREAM_SLOTS: usize = 8;

/// Slot index holding the transaction tag.
pub const TAG_SLOT: usize = 2 * STREAM_SLOTS;

/// Width of one packet: I/Q pairs for every stream slot plus the tag.
pub const PACKET_WIDTH: usize = TAG_SLOT + 1;

/// One sample row of a transfer: `[I0, Q0, I1, Q1, ..., I7, Q7, tag]`.
pub type Packet = [i32; PACKET_WIDTH];

/// Where the samples of one tone show up in the transfer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneRoute {
    /// Tag value marking samples that belong to this tone's readout group
    pub transaction: i32,
    /// Stream slot (0..8) carrying the tone's I/Q pair
    pub stream: usize,
}

/// Raw buffer produced by one read, indexed `[transfer][sample][slot]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPacketBatch {
    pub transfers: Vec<Vec<Packet>>,
}

impl RawPacketBatch {
    pub fn new(transfers: Vec<Vec<Packet>>) -> Self {
        Self { transfers }
    }

    /// Number of transfers in the batch.
    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    /// Number of samples in the longest transfer.
    pub fn samples_per_transfer(&self) -> usize {
        self.transfers.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Operations the readout hardware must expose.
///
/// Frequencies are in MHz throughout. Channel indices are signed so that
/// grids extending below the mixer stay representable.
pub trait DeviceSession {
    /// Emit tones at the quantized frequencies nearest those requested.
    ///
    /// Returns the frequencies actually programmed. Fails if two tones alias
    /// to the same output channel.
    fn program_tones(
        &mut self,
        frequencies: &[f64],
        amplitudes: &[f64],
        phases: &[f64],
    ) -> DeviceResult<Vec<f64>>;

    /// Configure the demodulation path for the given tones.
    ///
    /// `decimation` must lie in [2, 250].
    fn prepare_readout(
        &mut self,
        tone_frequencies: &[f64],
        decimation: u32,
    ) -> DeviceResult<Vec<ToneRoute>>;

    /// Read `transfer_count` transfers of `samples_per_transfer` rows each.
    fn transfer(
        &mut self,
        transfer_count: usize,
        samples_per_transfer: usize,
    ) -> DeviceResult<RawPacketBatch>;

    fn mixer_frequency(&self) -> f64;

    fn set_mixer_frequency(&mut self, frequency: f64) -> DeviceResult<()>;

    /// Input channel containing `frequency`.
    fn in_freq_to_channel(&self, frequency: f64) -> i64;

    /// Center frequency of input channel `channel`.
    fn in_channel_center(&self, channel: i64) -> f64;

    /// Output channel containing `frequency`.
    fn out_freq_to_channel(&self, frequency: f64) -> i64;

    /// Center frequency of output channel `channel`.
    fn out_channel_center(&self, channel: i64) -> f64;

    /// Input channel bandwidth.
    fn fc_in(&self) -> f64;

    /// Output channel bandwidth.
    fn fc_out(&self) -> f64;
}
