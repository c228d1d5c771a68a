//! # Readout - Scan and Calibration Front-End
//!
//! Command-line driver for the readout core. Every subcommand runs against
//! the simulated device configured by `--config` and writes its result as
//! JSON.
//!
//! ## Architecture
//! - **Main Thread**: parses arguments and runs the scan synchronously
//! - **Progress Thread**: logs sweep progress received over a crossbeam channel
//! - **Shutdown**: dropping the scanner closes the channel and ends the thread

mod args;
mod output;

use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use readout_core::config::SweepParams;
use readout_core::{
    Calibration, DeviceSession, ScanConfig, ScanProgress, Scanner, SimulatedDevice, SweepResult,
    ToneSet,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use args::{Args, Command};
use output::{load_json, packets_path, save_json};

/// Bound on queued progress notices; the scanner drops notices beyond it.
const PROGRESS_CAPACITY: usize = 256;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ScanConfig::load(path).context("Failed to load scan configuration")?,
        None => ScanConfig::default(),
    };
    debug!(?config, "scan configuration");

    let mut device = SimulatedDevice::new(config.simulation.clone());
    let (sender, receiver) = crossbeam_channel::bounded(PROGRESS_CAPACITY);
    let progress_thread = spawn_progress_logger(receiver);

    let result = {
        let mut scanner = Scanner::new(&mut device).with_progress(sender);
        run(&mut scanner, &args, &config)
    };

    progress_thread
        .join()
        .map_err(|_| anyhow!("Progress thread panicked"))?;
    result
}

/// Logs progress notices until every sender is gone.
fn spawn_progress_logger(receiver: Receiver<ScanProgress>) -> JoinHandle<()> {
    thread::spawn(move || {
        for progress in receiver.iter() {
            debug!(step = progress.step, total = progress.total, offset = progress.offset, "sweep step");
            if progress.step == progress.total {
                info!(steps = progress.total, "sweep finished");
            }
        }
    })
}

fn run(scanner: &mut Scanner<'_, SimulatedDevice>, args: &Args, config: &ScanConfig) -> Result<()> {
    let output = args.output.as_deref();
    match &args.command {
        Command::Delay { channel, bandwidth, nf } => {
            let mut params = config.delay.clone();
            if bandwidth.is_some() {
                params.bandwidth = *bandwidth;
            }
            if let Some(nf) = nf {
                params.nf = *nf;
            }
            let fit = scanner
                .measure_nominal_delay(*channel, &params)
                .with_context(|| format!("Delay measurement on channel {} failed", channel))?;
            info!(channel, delay = fit.delay, intercept = fit.intercept, "nominal delay");
            save_json(&fit, output)
        }
        Command::Sweep {
            tones,
            amplitude,
            bandwidth,
            nf,
            retain_packets,
        } => {
            let mut params = config.sweep.clone();
            if let Some(bandwidth) = bandwidth {
                params.bandwidth = *bandwidth;
            }
            if let Some(nf) = nf {
                params.nf = *nf;
            }
            params.retain_packets |= *retain_packets;

            let sweep = sweep_tones(scanner, tones, *amplitude, &params)?;
            save_json(&sweep, output)?;

            if params.retain_packets {
                match output {
                    Some(path) => save_json(&scanner.take_retained_packets(), Some(packets_path(path).as_path()))?,
                    None => warn!("raw packets are only written alongside --output"),
                }
            }
            Ok(())
        }
        Command::Calibrate {
            mixer,
            f_min,
            f_max,
            delay_channel,
        } => {
            let calibration = build_calibration(scanner, config, *mixer, *f_min, *f_max, *delay_channel)?;
            save_json(&calibration, output)
        }
        Command::Apply {
            calibration,
            tones,
            amplitude,
            mixer,
            delay_channel,
        } => {
            let calibration = match calibration {
                Some(path) => {
                    let calibration: Calibration = load_json(path)?;
                    scanner
                        .device_mut()
                        .set_mixer_frequency(calibration.mixer_frequency)
                        .context("Failed to restore the calibration mixer")?;
                    calibration
                }
                None => {
                    let (f_min, f_max) = tone_span(tones, scanner.device().fc_out())?;
                    build_calibration(scanner, config, *mixer, f_min, f_max, *delay_channel)?
                }
            };

            let sweep = sweep_tones(scanner, tones, *amplitude, &config.sweep)?;
            let corrected = calibration
                .apply(&sweep, config.amplitude_max)
                .context("Failed to apply calibration")?;
            save_json(&corrected, output)
        }
    }
}

fn sweep_tones(
    scanner: &mut Scanner<'_, SimulatedDevice>,
    frequencies: &[f64],
    amplitude: f64,
    params: &SweepParams,
) -> Result<SweepResult> {
    let n = frequencies.len();
    let tones = ToneSet::new(frequencies.to_vec(), vec![amplitude; n], vec![0.0; n])?;
    info!(tones = n, nf = params.nf, bandwidth = params.bandwidth, "starting sweep");
    scanner.fscan(&tones, params).context("Frequency sweep failed")
}

fn build_calibration(
    scanner: &mut Scanner<'_, SimulatedDevice>,
    config: &ScanConfig,
    mixer: f64,
    f_min: f64,
    f_max: f64,
    delay_channel: Option<i64>,
) -> Result<Calibration> {
    let mut params = config.calibration.clone();
    if let Some(channel) = delay_channel {
        let fit = scanner
            .measure_nominal_delay(channel, &config.delay)
            .with_context(|| format!("Delay measurement on channel {} failed", channel))?;
        info!(channel, delay = fit.delay, "using measured nominal delay");
        params.nominal_delay = Some(fit.delay);
    }

    let calibration = scanner
        .make_calibration(mixer, f_min, f_max, &params)
        .with_context(|| format!("Calibration over [{}, {}] MHz failed", f_min, f_max))?;
    info!(
        partitions = calibration.interpolants.len(),
        f_min,
        f_max,
        "calibration built"
    );
    Ok(calibration)
}

/// Range covering every tone with half an output channel to spare.
fn tone_span(tones: &[f64], fc_out: f64) -> Result<(f64, f64)> {
    let lo = tones.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = tones.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(lo.is_finite() && hi.is_finite()) {
        return Err(anyhow!("At least one finite tone frequency is required"));
    }
    Ok((lo - fc_out / 2.0, hi + fc_out / 2.0))
}
