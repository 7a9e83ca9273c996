use crate::{
    error::{Result, SpectraError},
    kd::KdFile,
    table::TableDirectory,
};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Decoded spectra before any processing
///
/// `spectra` is laid out wavelength x cycle: row `r` holds the absorbance at
/// `wavelengths[r]` and column `c` is the spectrum acquired at `times[c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpectra {
    /// Name of the source (file or directory name)
    pub name: String,
    /// Ascending wavelength axis in nm, shared by every spectrum
    pub wavelengths: Vec<f64>,
    /// Absorbance matrix, `wavelengths.len()` rows by `times.len()` columns
    pub spectra: Array2<f64>,
    /// Per-cycle timestamps (seconds, or cycle index when no cycle time is known)
    pub times: Vec<f64>,
    /// The experiment's cycle time in seconds, when known
    pub cycle_time: Option<f64>,
}

impl RawSpectra {
    /// Assemble and validate decoded spectra
    ///
    /// # Errors
    /// Will return `Err` if:
    /// - there are no spectra (`EmptyDataset`)
    /// - the matrix shape disagrees with the wavelength or time axis
    /// - the wavelength axis is not strictly ascending
    /// - the time axis decreases or contains non-finite values
    pub fn new(
        name: impl Into<String>,
        wavelengths: Vec<f64>,
        spectra: Array2<f64>,
        times: Vec<f64>,
        cycle_time: Option<f64>,
    ) -> Result<Self> {
        let name = name.into();
        let (n_rows, n_cols) = spectra.dim();

        if n_cols == 0 || n_rows == 0 {
            return Err(SpectraError::EmptyDataset(name));
        }
        if n_rows != wavelengths.len() {
            return Err(SpectraError::Format(format!(
                "{name}: {} wavelengths but spectra have {n_rows} rows",
                wavelengths.len()
            )));
        }
        if n_cols != times.len() {
            return Err(SpectraError::Format(format!(
                "{name}: {} timestamps for {n_cols} spectra",
                times.len()
            )));
        }
        if !wavelengths.windows(2).all(|w| w[0] < w[1]) {
            return Err(SpectraError::Format(format!(
                "{name}: wavelength axis is not strictly ascending"
            )));
        }
        if times.iter().any(|t| !t.is_finite()) || !times.windows(2).all(|w| w[0] <= w[1]) {
            return Err(SpectraError::Format(format!(
                "{name}: spectrum times are not in non-decreasing order"
            )));
        }
        if let Some(ct) = cycle_time {
            validate_cycle_time(ct)?;
        }

        debug!(
            "Assembled {} spectra x {} wavelengths from {}",
            n_cols, n_rows, name
        );

        Ok(Self {
            name,
            wavelengths,
            spectra,
            times,
            cycle_time,
        })
    }

    /// Number of acquisition cycles (spectra)
    #[must_use]
    pub fn n_cycles(&self) -> usize {
        self.spectra.ncols()
    }
}

/// Shared decode contract for every supported source format
pub trait SpectralDecoder {
    /// Decode the source into a spectrum matrix with aligned axes
    ///
    /// # Errors
    /// Returns a `Format`, `EmptyDataset` or `InconsistentAxis` error when the
    /// source cannot be turned into a rectangular set of spectra.
    fn decode(&self) -> Result<RawSpectra>;
}

/// A source of spectra: either a binary `.KD` container or a directory of
/// per-spectrum tables
#[derive(Debug, Clone)]
pub enum SpectraSource {
    Kd(KdFile),
    TableDirectory(TableDirectory),
}

impl SpectraSource {
    /// Pick the decoder for `path`: directories are read as table sources,
    /// anything else as a `.KD` container
    ///
    /// `cycle_time` only applies to table sources; containers carry their own.
    pub fn from_path(path: impl AsRef<Path>, cycle_time: Option<f64>) -> Self {
        let path = path.as_ref();
        if path.is_dir() {
            Self::TableDirectory(TableDirectory {
                path: path.to_path_buf(),
                cycle_time,
                ..TableDirectory::new(path)
            })
        } else {
            Self::Kd(KdFile::new(path))
        }
    }

    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Kd(kd) => &kd.path,
            Self::TableDirectory(dir) => &dir.path,
        }
    }
}

impl SpectralDecoder for SpectraSource {
    fn decode(&self) -> Result<RawSpectra> {
        match self {
            Self::Kd(kd) => kd.decode(),
            Self::TableDirectory(dir) => dir.decode(),
        }
    }
}

pub(crate) fn validate_cycle_time(cycle_time: f64) -> Result<()> {
    if cycle_time.is_finite() && cycle_time > 0.0 {
        Ok(())
    } else {
        Err(SpectraError::InvalidCycleTime(cycle_time))
    }
}

/// Name used for a source in logs and summaries
pub(crate) fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
