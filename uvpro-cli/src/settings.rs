//! Persisted user settings
//!
//! Stored as JSON in `~/.config/uvpro/settings.json` unless `--config` points
//! elsewhere. Settings are loaded once at startup and handed to the pipeline
//! as plain values.

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uvpro_rs::{LowSignalWindow, ProcessingOptions};

const CONFIG_DIR: &str = ".config/uvpro";
const CONFIG_FILENAME: &str = "settings.json";

/// Keys accepted by `uvpro config set`
pub const KEYS: [&str; 9] = [
    "root_directory",
    "plot_size",
    "primary_color",
    "outlier_threshold",
    "baseline_smoothness",
    "baseline_tolerance",
    "low_signal_window",
    "trace_window",
    "trace_interval",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Relative input paths are resolved against this directory
    pub root_directory: Option<PathBuf>,

    /// Figure size (width, height) in inches for plotting front ends
    pub plot_size: (f64, f64),

    pub primary_color: String,

    /// Defaults for `uvpro process`; command-line flags override them
    pub processing: ProcessingOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_directory: None,
            plot_size: (10.0, 5.0),
            primary_color: "magenta".to_string(),
            processing: ProcessingOptions::default(),
        }
    }
}

impl Settings {
    /// `~/.config/uvpro/settings.json`, or the working directory without a home
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR)
            .join(CONFIG_FILENAME)
    }

    /// Load settings, falling back to defaults when the file does not exist
    ///
    /// # Errors
    /// Fails if the file exists but cannot be read or parsed, or holds invalid
    /// processing options.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let mut settings: Settings = serde_json::from_str(&text)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        settings.processing.validate()?;

        if let Some(root) = &settings.root_directory {
            if !root.is_dir() {
                warn!(
                    "Root directory {} does not exist, ignoring it",
                    root.display()
                );
                settings.root_directory = None;
            }
        }
        Ok(settings)
    }

    /// Write settings, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Set one value from its command-line text
    ///
    /// The change is validated before it is applied.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "root_directory" => {
                let value = value.trim();
                updated.root_directory = if value.is_empty() {
                    None
                } else {
                    let path = PathBuf::from(value);
                    if !path.is_dir() {
                        bail!("{} is not a directory", path.display());
                    }
                    Some(path)
                };
            }
            "plot_size" => {
                let (width, height) = parse_pair(value)?;
                if !(width > 0.0 && height > 0.0) {
                    bail!("plot size must be positive, got {width} x {height}");
                }
                updated.plot_size = (width, height);
            }
            "primary_color" => {
                let color = value.trim();
                if color.is_empty() {
                    bail!("primary color must not be empty");
                }
                updated.primary_color = color.to_string();
            }
            "outlier_threshold" => updated.processing.outliers.threshold = parse_number(value)?,
            "baseline_smoothness" => updated.processing.baseline.lambda = parse_number(value)?,
            "baseline_tolerance" => updated.processing.baseline.tolerance = parse_number(value)?,
            "low_signal_window" => {
                updated.processing.outliers.low_signal.window = value
                    .trim()
                    .parse::<LowSignalWindow>()
                    .map_err(|_| anyhow!("low signal window must be none, narrow or wide"))?;
            }
            "trace_window" => {
                let (min, max) = parse_pair(value)?;
                updated.processing.trace.min_wavelength = min;
                updated.processing.trace.max_wavelength = max;
            }
            "trace_interval" => updated.processing.trace.interval = parse_number(value)?,
            other => bail!("Unknown setting '{other}'. Valid keys: {}", KEYS.join(", ")),
        }

        updated.processing.validate()?;
        *self = updated;
        Ok(())
    }
}

fn parse_number(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .with_context(|| format!("'{value}' is not a number"))
}

/// Two numbers separated by whitespace or a comma
fn parse_pair(value: &str) -> Result<(f64, f64)> {
    let parts: Vec<&str> = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    match parts.as_slice() {
        [a, b] => Ok((parse_number(a)?, parse_number(b)?)),
        _ => bail!("expected two numbers, got '{value}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("none.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.set("plot_size", "8 4").unwrap();
        settings.set("low_signal_window", "Wide").unwrap();
        settings.set("trace_window", "350,900").unwrap();
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.plot_size, (8.0, 4.0));
        assert_eq!(loaded.processing.outliers.low_signal.window, LowSignalWindow::Wide);
        assert_eq!(loaded.processing.trace.min_wavelength, 350.0);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_invalid_values_leave_settings_unchanged() {
        let mut settings = Settings::default();
        assert!(settings.set("baseline_smoothness", "-3").is_err());
        assert!(settings.set("trace_window", "900 300").is_err());
        assert!(settings.set("plot_size", "10").is_err());
        assert!(settings.set("colour", "red").is_err());
        assert!(settings.set("outlier_threshold", "0").is_err());
        assert!(settings.set("trace_interval", "1e-9").is_err());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_missing_root_directory_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"root_directory": "/no/such/dir", "primary_color": "teal"}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(settings.root_directory.is_none());
        assert_eq!(settings.primary_color, "teal");
        assert_eq!(settings.plot_size, (10.0, 5.0));
    }
}
