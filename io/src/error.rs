use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpectraError {
    #[error("Unrecognized or corrupt spectral data: {0}")]
    Format(String),

    #[error("No usable spectra found in {0}")]
    EmptyDataset(String),

    #[error("Wavelength axis of {file} disagrees with the first spectrum: expected {expected}, found {found}")]
    InconsistentAxis {
        file: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Invalid cycle time: {0} (must be a positive, finite number of seconds)")]
    InvalidCycleTime(f64),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SpectraError>;
