use thiserror::Error;
use uvpro_io::SpectraError;

#[derive(Error, Debug)]
pub enum UvProError {
    #[error(transparent)]
    Spectra(#[from] SpectraError),

    #[error("No cycles remain in range {first}..={last}")]
    EmptyRange { first: f64, last: f64 },

    #[error("Unit mismatch: {0}")]
    UnitMismatch(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid slice parameter: {0}")]
    InvalidSliceParameter(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Statistical computation failed: {0}")]
    StatsError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, UvProError>;
