//! Outlier-aware cleaning of time-resolved UV-vis spectra
//!
//! A kinetics run is a series of absorbance spectra taken at a fixed cycle
//! time. Mixing, cuvette removal and lamp glitches leave artifact spectra in the
//! run. This crate finds them and reduces the run to analysis-ready spectra.
//!
//! # Quick Start
//!
//! ```no_run
//! use uvpro_rs::{Dataset, LowSignalWindow, ProcessingOptions, SliceSpec, TrimRange};
//!
//! let options = ProcessingOptions::default()
//!     .with_low_signal_window(LowSignalWindow::Wide)
//!     .with_trim(TrimRange::new(30.0, -1.0))
//!     .with_slicing(SliceSpec::Equal { count: 10 });
//!
//! let dataset = Dataset::open("data/kinetics.KD", &options)?;
//! println!("{}", dataset.summary());
//!
//! let spectra = dataset.processed_spectra();
//! println!("{} cleaned spectra", spectra.ncols());
//! # Ok::<(), uvpro_rs::UvProError>(())
//! ```
//!
//! # Pipeline
//!
//! 1. Decode a `.KD` container or a table directory ([`uvpro_io`])
//! 2. Build the combined time trace ([`trace`])
//! 3. Fit an asymmetric least-squares baseline and flag outliers ([`qc`])
//! 4. Trim to a time window ([`trim`]) and slice to representative spectra ([`slicing`])
//!
//! [`Dataset`] runs the whole pipeline and keeps every per-cycle array aligned.

pub mod dataset;
pub mod error;
pub mod options;
pub mod qc;
pub mod slicing;
pub mod stats;
pub mod trace;
pub mod trim;

pub use dataset::{ChosenTraces, Dataset, DatasetSummary};
pub use error::{Result, UvProError};
pub use options::ProcessingOptions;
pub use qc::{
    find_outliers, fit_baseline, BaselineConfig, BaselineFit, BaselineInput, LowSignalConfig,
    LowSignalWindow, OutlierConfig, OutlierResult, ThresholdMode,
};
pub use slicing::SliceSpec;
pub use trace::{build_combined_trace, CombinedTrace, TraceConfig};
pub use trim::{TrimRange, Units};

pub use uvpro_io::{RawSpectra, SpectraSource, SpectralDecoder};
