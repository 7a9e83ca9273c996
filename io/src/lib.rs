//! Readers and writers for UV-vis spectrometer data
//!
//! Two source formats decode into the same [`RawSpectra`]:
//! - binary `.KD` containers written by Agilent 845x ChemStation ([`KdFile`])
//! - directories of per-spectrum `.csv` tables ([`TableDirectory`])
//!
//! ```no_run
//! use uvpro_io::{SpectraSource, SpectralDecoder};
//!
//! let raw = SpectraSource::from_path("data/kinetics.KD", None).decode()?;
//! println!("{} spectra, cycle time {:?} s", raw.n_cycles(), raw.cycle_time);
//! # Ok::<(), uvpro_io::SpectraError>(())
//! ```

pub use error::{Result, SpectraError};
pub use kd::{KdFile, KdLayout, decode_kd_bytes};
pub use spectra::{RawSpectra, SpectraSource, SpectralDecoder};
pub use table::{TableDirectory, TableDirectoryBuilder, read_table};
pub use write::{
    unique_path, write_spectra_csv, write_table_directory, write_trace_csv, write_traces_csv,
};

pub mod error;
pub mod kd;
pub mod spectra;
pub mod table;
pub mod write;
