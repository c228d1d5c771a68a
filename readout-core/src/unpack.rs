//! # Packet Unpacking Module
//!
//! Converts raw transfer buffers into complex I/Q samples per tone.
//!
//! Several tones can share one stream slot: the hardware time-multiplexes
//! them and marks every row with a transaction tag. A tone's samples are the
//! rows whose tag matches the tone's route, so the number of samples per
//! tone varies from transfer to transfer and from tone to tone.

use num_complex::Complex64;
use tracing::trace;

use crate::device::{RawPacketBatch, ToneRoute, STREAM_SLOTS, TAG_SLOT};
use crate::error::{ReadoutError, ReadoutResult};

/// Samples grouped as `[transfer][tone]`, each a variable-length sequence.
pub type SamplesByTransferTone = Vec<Vec<Vec<Complex64>>>;

/// How raw rows are turned into samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnpackOptions {
    /// Leading rows of every transfer to discard
    pub i_begin: usize,
    /// Rotate samples back by the commanded tone phase
    pub subtract_input_phase: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            i_begin: 0,
            subtract_input_phase: true,
        }
    }
}

/// Returns `x` with its angle reduced by `phase`, magnitude unchanged.
pub fn subtract_phase(x: Complex64, phase: f64) -> Complex64 {
    Complex64::from_polar(x.norm(), x.arg() - phase)
}

/// Unpacks a batch without averaging.
///
/// # Arguments
/// * `batch` - Raw rows from one read
/// * `routes` - Transaction/stream assignment per tone
/// * `tone_phases` - Commanded phase per tone, in radians
/// * `options` - Truncation and phase-referencing settings
///
/// # Returns
/// * Samples indexed `[transfer][tone]`; inner lengths may differ and may be
///   zero when a tone's tag never appears.
pub fn unpack(
    batch: &RawPacketBatch,
    routes: &[ToneRoute],
    tone_phases: &[f64],
    options: UnpackOptions,
) -> ReadoutResult<SamplesByTransferTone> {
    if routes.len() != tone_phases.len() {
        return Err(ReadoutError::Configuration(format!(
            "{} routes but {} tone phases",
            routes.len(),
            tone_phases.len()
        )));
    }
    if let Some(bad) = routes.iter().find(|r| r.stream >= STREAM_SLOTS) {
        return Err(ReadoutError::Configuration(format!(
            "Stream slot {} out of range",
            bad.stream
        )));
    }

    let by_transfer = batch
        .transfers
        .iter()
        .map(|rows| {
            let rows = rows.get(options.i_begin..).unwrap_or(&[]);
            routes
                .iter()
                .zip(tone_phases)
                .map(|(route, &phase)| {
                    rows.iter()
                        .filter(|row| row[TAG_SLOT] == route.transaction)
                        .map(|row| {
                            let x = Complex64::new(
                                row[2 * route.stream] as f64,
                                row[2 * route.stream + 1] as f64,
                            );
                            if options.subtract_input_phase {
                                subtract_phase(x, phase)
                            } else {
                                x
                            }
                        })
                        .collect()
                })
                .collect()
        })
        .collect();
    Ok(by_transfer)
}

/// Averages unpacked samples: mean per (transfer, tone), then mean over
/// transfers.
///
/// An empty (transfer, tone) selection has no mean and is reported as
/// [`ReadoutError::EmptySelection`].
pub fn average(samples: &SamplesByTransferTone, routes: &[ToneRoute]) -> ReadoutResult<Vec<Complex64>> {
    let n_tones = routes.len();
    let n_transfers = samples.len();
    let mut sums = vec![Complex64::new(0.0, 0.0); n_tones];

    for (it, by_tone) in samples.iter().enumerate() {
        for (tone, xs) in by_tone.iter().enumerate().take(n_tones) {
            if xs.is_empty() {
                return Err(ReadoutError::EmptySelection {
                    transfer: it,
                    tone,
                    transaction: routes[tone].transaction,
                });
            }
            trace!(transfer = it, tone, count = xs.len(), "tone selection");
            sums[tone] += xs.iter().sum::<Complex64>() / xs.len() as f64;
        }
    }

    if n_transfers == 0 {
        return match routes.first() {
            Some(route) => Err(ReadoutError::EmptySelection {
                transfer: 0,
                tone: 0,
                transaction: route.transaction,
            }),
            None => Ok(Vec::new()),
        };
    }

    Ok(sums.into_iter().map(|s| s / n_transfers as f64).collect())
}

/// Unpacks a batch and averages it down to one complex value per tone.
pub fn unpack_averaged(
    batch: &RawPacketBatch,
    routes: &[ToneRoute],
    tone_phases: &[f64],
    options: UnpackOptions,
) -> ReadoutResult<Vec<Complex64>> {
    let samples = unpack(batch, routes, tone_phases, options)?;
    average(&samples, routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Packet, PACKET_WIDTH};
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    fn row(tag: i32, values: &[(usize, i32, i32)]) -> Packet {
        let mut packet = [0; PACKET_WIDTH];
        for &(stream, i, q) in values {
            packet[2 * stream] = i;
            packet[2 * stream + 1] = q;
        }
        packet[TAG_SLOT] = tag;
        packet
    }

    /// Two tones share stream 1 on transactions 0 and 1; a third rides
    /// stream 4 on transaction 0. Tags are not evenly interleaved.
    fn sample_batch() -> (RawPacketBatch, Vec<ToneRoute>) {
        let routes = vec![
            ToneRoute { transaction: 0, stream: 1 },
            ToneRoute { transaction: 1, stream: 1 },
            ToneRoute { transaction: 0, stream: 4 },
        ];
        let transfers = vec![
            vec![
                row(1, &[(1, 900, 900)]),
                row(0, &[(1, 100, 10), (4, -50, 5)]),
                row(1, &[(1, 200, -20)]),
                row(0, &[(1, 120, 14), (4, -52, 7)]),
                row(0, &[(1, 110, 12), (4, -48, 6)]),
            ],
            vec![
                row(0, &[(1, 300, 30), (4, 10, 1)]),
                row(1, &[(1, 400, -40)]),
                row(1, &[(1, 410, -44)]),
                row(0, &[(1, 90, 8), (4, 12, 3)]),
            ],
        ];
        (RawPacketBatch::new(transfers), routes)
    }

    #[test]
    fn test_selects_by_tag_and_stream() {
        let (batch, routes) = sample_batch();
        let options = UnpackOptions { i_begin: 1, subtract_input_phase: false };
        let xs = unpack(&batch, &routes, &[0.0; 3], options).unwrap();

        assert_eq!(xs.len(), 2);
        // Transfer 0 with its first row dropped
        assert_eq!(xs[0][0].len(), 3);
        assert_eq!(xs[0][1], vec![Complex64::new(200.0, -20.0)]);
        assert_eq!(xs[0][2][0], Complex64::new(-50.0, 5.0));
        // Transfer 1 loses its leading transaction-0 row
        assert_eq!(xs[1][0], vec![Complex64::new(90.0, 8.0)]);
        assert_eq!(xs[1][1].len(), 2);
    }

    #[test]
    fn test_average_matches_manual_mean() {
        let (batch, routes) = sample_batch();
        let phases = [0.3, -1.1, 2.0];
        let options = UnpackOptions { i_begin: 0, subtract_input_phase: true };

        let raw = unpack(&batch, &routes, &phases, options).unwrap();
        let averaged = unpack_averaged(&batch, &routes, &phases, options).unwrap();

        for tone in 0..routes.len() {
            let per_transfer: Vec<Complex64> = raw
                .iter()
                .map(|by_tone| {
                    let xs = &by_tone[tone];
                    xs.iter().sum::<Complex64>() / xs.len() as f64
                })
                .collect();
            let manual = per_transfer.iter().sum::<Complex64>() / per_transfer.len() as f64;
            assert_abs_diff_eq!(manual.re, averaged[tone].re, epsilon = 1e-9);
            assert_abs_diff_eq!(manual.im, averaged[tone].im, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_subtract_input_phase_preserves_magnitude() {
        let (batch, routes) = sample_batch();
        let plain = unpack(&batch, &routes, &[0.0; 3], UnpackOptions { i_begin: 0, subtract_input_phase: false }).unwrap();
        let rotated = unpack(&batch, &routes, &[FRAC_PI_2; 3], UnpackOptions::default()).unwrap();

        let a = plain[0][2][0];
        let b = rotated[0][2][0];
        assert_abs_diff_eq!(a.norm(), b.norm(), epsilon = 1e-9);
        // Rotating by -pi/2 maps (re, im) to (im, -re)
        assert_abs_diff_eq!(b.re, a.im, epsilon = 1e-9);
        assert_abs_diff_eq!(b.im, -a.re, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_tag_is_empty_selection() {
        let (batch, mut routes) = sample_batch();
        routes[2].transaction = 7;

        let raw = unpack(&batch, &routes, &[0.0; 3], UnpackOptions::default()).unwrap();
        assert!(raw[0][2].is_empty());

        let err = unpack_averaged(&batch, &routes, &[0.0; 3], UnpackOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ReadoutError::EmptySelection { transfer: 0, tone: 2, transaction: 7 }
        );
    }

    #[test]
    fn test_no_transfers_is_empty_selection() {
        let (_, routes) = sample_batch();
        let batch = RawPacketBatch::new(Vec::new());
        let raw = unpack(&batch, &routes, &[0.0; 3], UnpackOptions::default()).unwrap();
        assert!(raw.is_empty());

        let err = average(&raw, &routes).unwrap_err();
        assert_eq!(
            err,
            ReadoutError::EmptySelection { transfer: 0, tone: 0, transaction: 0 }
        );
        assert_eq!(average(&raw, &[]).unwrap(), Vec::<Complex64>::new());
    }

    #[test]
    fn test_truncation_past_end_is_empty() {
        let (batch, routes) = sample_batch();
        let options = UnpackOptions { i_begin: 50, subtract_input_phase: false };
        let raw = unpack(&batch, &routes, &[0.0; 3], options).unwrap();
        assert!(raw.iter().flatten().all(Vec::is_empty));
    }

    #[test]
    fn test_mismatched_phases_rejected() {
        let (batch, routes) = sample_batch();
        let err = unpack(&batch, &routes, &[0.0; 2], UnpackOptions::default()).unwrap_err();
        assert!(matches!(err, ReadoutError::Configuration(_)));
    }
}
