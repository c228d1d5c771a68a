//! JSON persistence for sweeps, calibrations and delay fits.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::info;

/// Writes `value` as pretty JSON to `path`, or to stdout when no path is given.
pub fn save_json<T: Serialize>(value: &T, path: Option<&Path>) -> Result<()> {
    let json_string = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    match path {
        Some(path) => {
            let mut file =
                File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            file.write_all(json_string.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "wrote result");
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", json_string).context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

/// Reads a value previously written by [`save_json`].
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut data = String::new();
    file.read_to_string(&mut data)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Path for the raw packets kept alongside a sweep written to `path`.
pub fn packets_path(path: &Path) -> std::path::PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("sweep");
    path.with_file_name(format!("{}.packets.json", stem))
}
