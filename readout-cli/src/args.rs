use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Frequency sweeps, delay measurement and calibration for the readout chain",
    long_about = None,
    arg_required_else_help = true,
    after_help = "Examples:\n  readout delay --channel 25\n  readout sweep --tones 100,108,116 --amplitude 0.2 --output sweep.json\n  readout calibrate --f-min 100 --f-max 110 --delay-channel 25 --output calib.json\n  readout apply --calibration calib.json --tones 101,105 --output corrected.json\n"
)]
pub struct Args {
    /// JSON file with scan, calibration and simulation settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Where to write the JSON result (stdout when omitted)
    #[arg(long, short, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Measure the nominal delay on one output channel
    Delay {
        /// Output channel whose center is swept
        #[arg(long, allow_hyphen_values = true)]
        channel: i64,

        /// Scan width in MHz (default: a hundredth of the channel width)
        #[arg(long)]
        bandwidth: Option<f64>,

        /// Number of frequency points
        #[arg(long)]
        nf: Option<usize>,
    },

    /// Sweep a set of tones around their base frequencies
    Sweep {
        /// Comma-separated base frequencies in MHz
        #[arg(long, value_delimiter = ',', required = true)]
        tones: Vec<f64>,

        /// Amplitude of every tone
        #[arg(long, default_value_t = 0.1)]
        amplitude: f64,

        /// Scan width in MHz
        #[arg(long)]
        bandwidth: Option<f64>,

        /// Number of frequency points
        #[arg(long)]
        nf: Option<usize>,

        /// Keep the raw packets and write them next to the output
        #[arg(long)]
        retain_packets: bool,
    },

    /// Build a calibration over a frequency range
    Calibrate {
        /// Mixer frequency in MHz
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        mixer: f64,

        /// Lower edge of the range in MHz
        #[arg(long = "f-min", allow_hyphen_values = true)]
        f_min: f64,

        /// Upper edge of the range in MHz
        #[arg(long = "f-max", allow_hyphen_values = true)]
        f_max: f64,

        /// Measure the nominal delay on this output channel first
        #[arg(long = "delay-channel", allow_hyphen_values = true)]
        delay_channel: Option<i64>,
    },

    /// Sweep tones and correct them with a calibration
    ///
    /// The calibration is read from `--calibration` when given, otherwise
    /// one is built first over the span of the tones.
    Apply {
        /// Calibration written by `readout calibrate`
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Comma-separated base frequencies in MHz
        #[arg(long, value_delimiter = ',', required = true)]
        tones: Vec<f64>,

        /// Amplitude of every tone
        #[arg(long, default_value_t = 0.1)]
        amplitude: f64,

        /// Mixer frequency used when building the calibration
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        mixer: f64,

        /// Measure the nominal delay on this output channel before building
        #[arg(long = "delay-channel", allow_hyphen_values = true)]
        delay_channel: Option<i64>,
    },
}
