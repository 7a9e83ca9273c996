use crate::error::{Result, UvProError};
use crate::options::ProcessingOptions;
use crate::qc::{find_outliers, BaselineConfig, OutlierConfig, OutlierResult};
use crate::slicing::SliceSpec;
use crate::trace::{build_combined_trace, nearest_index, TraceConfig};
use crate::trim::{TrimRange, Units};
use ndarray::{s, Array2, ArrayView2, Axis};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uvpro_io::{
    unique_path, write_spectra_csv, write_table_directory, write_trace_csv, write_traces_csv,
    RawSpectra, SpectraSource, SpectralDecoder,
};

/// Runs with this many cycles or fewer are only loaded, never classified
const MIN_CYCLES_FOR_CLASSIFICATION: usize = 2;

/// Wavelength match tolerance (nm) for chosen traces
const WAVELENGTH_TOLERANCE: f64 = 1e-6;

/// A time-resolved run of spectra with its outlier analysis
///
/// Spectra, times, combined trace, baseline and outlier flags are aligned on
/// the cycle axis and are always narrowed together. Outliers are flagged, not
/// removed; [`Dataset::processed_spectra`] gives the cleaned view.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    wavelengths: Vec<f64>,
    /// wavelength x cycle
    spectra: Array2<f64>,
    times: Vec<f64>,
    cycle_time: Option<f64>,
    units: Units,

    trace: Vec<f64>,
    trace_rows: Vec<usize>,
    baseline: Vec<f64>,
    outliers: Vec<bool>,
    threshold_flags: Vec<bool>,
    low_signal_flags: Vec<bool>,
    baseline_iterations: usize,
    baseline_converged: bool,

    /// Cycles picked by slicing, as indices into the cycle axis
    selection: Option<Vec<usize>>,
    spectra_found: usize,
    view_only: bool,
    options: ProcessingOptions,
}

/// Trace, baseline and flags computed together
struct Analysis {
    trace: Vec<f64>,
    trace_rows: Vec<usize>,
    outliers: OutlierResult,
}

impl Dataset {
    /// Decode a `.KD` container or a directory of tables and process it
    ///
    /// # Errors
    /// Returns a configuration error before any file is read if `options` is
    /// invalid, then any decode or processing error.
    pub fn open(path: impl AsRef<Path>, options: &ProcessingOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();
        info!("Loading spectra from {}", path.display());
        let raw = SpectraSource::from_path(path, options.cycle_time).decode()?;
        Self::from_raw(raw, options)
    }

    /// Process already decoded spectra
    ///
    /// # Pipeline
    /// 1. Combined time trace over the configured wavelength window
    /// 2. Baseline fit and outlier classification
    /// 3. Trim, when `options.trim` is set
    /// 4. Slicing, when `options.slicing` is set
    ///
    /// View-only runs (and runs of two cycles or fewer) stop after step 1 with
    /// a baseline equal to the trace and no outliers.
    ///
    /// # Errors
    /// Returns the first configuration, range or numerical error.
    pub fn from_raw(raw: RawSpectra, options: &ProcessingOptions) -> Result<Self> {
        options.validate()?;

        let n_cycles = raw.n_cycles();
        let view_only = options.view_only || n_cycles <= MIN_CYCLES_FOR_CLASSIFICATION;
        let analysis = analyze(
            &raw.wavelengths,
            raw.spectra.view(),
            &options.trace,
            &options.outliers,
            &options.baseline,
            view_only,
        )?;

        let mut dataset = Dataset {
            name: raw.name,
            units: Units::for_cycle_time(raw.cycle_time),
            wavelengths: raw.wavelengths,
            spectra: raw.spectra,
            times: raw.times,
            cycle_time: raw.cycle_time,
            trace: Vec::new(),
            trace_rows: Vec::new(),
            baseline: Vec::new(),
            outliers: Vec::new(),
            threshold_flags: Vec::new(),
            low_signal_flags: Vec::new(),
            baseline_iterations: 0,
            baseline_converged: true,
            selection: None,
            spectra_found: n_cycles,
            view_only,
            options: ProcessingOptions {
                trim: None,
                slicing: None,
                ..options.clone()
            },
        };
        dataset.apply_analysis(analysis);

        if view_only {
            info!("{}: {} spectra loaded (view only)", dataset.name, n_cycles);
            return Ok(dataset);
        }

        if let Some(range) = &options.trim {
            dataset = dataset.trim(range)?;
        }
        if let Some(spec) = &options.slicing {
            dataset = dataset.slice(spec)?;
        }

        info!(
            "{}: {} spectra, {} outliers, {} remaining",
            dataset.name,
            n_cycles,
            dataset.n_outliers(),
            dataset.view_indices().len()
        );
        Ok(dataset)
    }

    fn apply_analysis(&mut self, analysis: Analysis) {
        self.trace = analysis.trace;
        self.trace_rows = analysis.trace_rows;
        self.baseline = analysis.outliers.baseline;
        self.outliers = analysis.outliers.mask;
        self.threshold_flags = analysis.outliers.threshold_flags;
        self.low_signal_flags = analysis.outliers.low_signal_flags;
        self.baseline_iterations = analysis.outliers.iterations;
        self.baseline_converged = analysis.outliers.converged;
    }

    /// Rebuild the trace over a new wavelength window and reclassify
    ///
    /// # Errors
    /// On any error the dataset is left unchanged.
    pub fn set_trace_config(&mut self, trace: TraceConfig) -> Result<()> {
        trace.validate()?;
        self.reanalyze(trace, self.options.outliers.clone(), self.options.baseline.clone())
    }

    /// Reclassify with new outlier and baseline parameters
    ///
    /// # Errors
    /// On any error the dataset is left unchanged.
    pub fn set_outlier_options(&mut self, outliers: OutlierConfig, baseline: BaselineConfig) -> Result<()> {
        outliers.validate()?;
        baseline.validate()?;
        self.reanalyze(self.options.trace.clone(), outliers, baseline)
    }

    fn reanalyze(&mut self, trace: TraceConfig, outliers: OutlierConfig, baseline: BaselineConfig) -> Result<()> {
        let analysis = analyze(
            &self.wavelengths,
            self.spectra.view(),
            &trace,
            &outliers,
            &baseline,
            self.view_only,
        )?;

        // Outlier flags moved, so an existing slicing has to be recomputed
        let selection = match &self.options.slicing {
            Some(spec) => {
                let retained = retained_cycles(&analysis.outliers.mask);
                let values = self.unit_values(&retained);
                Some(spec.positions(&values)?.into_iter().map(|p| retained[p]).collect())
            }
            None => None,
        };

        self.apply_analysis(analysis);
        self.selection = selection;
        self.options.trace = trace;
        self.options.outliers = outliers;
        self.options.baseline = baseline;
        Ok(())
    }

    /// A new dataset holding only the cycles within `range`
    ///
    /// Every aligned array is narrowed together; the analysis is not rerun.
    ///
    /// # Errors
    /// `InvalidRange`, `UnitMismatch` or `EmptyRange`, see [`TrimRange::resolve`].
    pub fn trim(&self, range: &TrimRange) -> Result<Dataset> {
        let span = range.resolve(&self.times, self.units, self.cycle_time)?;
        let (start, end) = (span.start, span.end);

        let selection = self.selection.as_ref().and_then(|selection| {
            let kept: Vec<usize> = selection
                .iter()
                .filter(|&&i| i >= start && i < end)
                .map(|&i| i - start)
                .collect();
            if kept.is_empty() {
                debug!("No sliced cycles inside {}, dropping the selection", range);
                None
            } else {
                Some(kept)
            }
        });

        Ok(Dataset {
            name: self.name.clone(),
            wavelengths: self.wavelengths.clone(),
            spectra: self.spectra.slice(s![.., start..end]).to_owned(),
            times: self.times[start..end].to_vec(),
            cycle_time: self.cycle_time,
            units: self.units,
            trace: self.trace[start..end].to_vec(),
            trace_rows: self.trace_rows.clone(),
            baseline: self.baseline[start..end].to_vec(),
            outliers: self.outliers[start..end].to_vec(),
            threshold_flags: self.threshold_flags[start..end].to_vec(),
            low_signal_flags: self.low_signal_flags[start..end].to_vec(),
            baseline_iterations: self.baseline_iterations,
            baseline_converged: self.baseline_converged,
            selection,
            spectra_found: self.spectra_found,
            view_only: self.view_only,
            options: ProcessingOptions {
                trim: Some(*range),
                ..self.options.clone()
            },
        })
    }

    /// A new dataset whose view is reduced to representative spectra
    ///
    /// Slicing picks among the retained (non-outlier) cycles; nothing is
    /// deleted.
    ///
    /// # Errors
    /// `InvalidSliceParameter` if the slicing parameters are invalid.
    pub fn slice(&self, spec: &SliceSpec) -> Result<Dataset> {
        let retained = self.retained_indices();
        let values = self.unit_values(&retained);
        let selection: Vec<usize> = spec.positions(&values)?.into_iter().map(|p| retained[p]).collect();

        let mut sliced = self.clone();
        sliced.selection = Some(selection);
        sliced.options.slicing = Some(spec.clone());
        Ok(sliced)
    }

    /// Time or index value of each cycle, depending on the dataset units
    fn unit_values(&self, cycles: &[usize]) -> Vec<f64> {
        cycles
            .iter()
            .map(|&i| match self.units {
                Units::Seconds => self.times[i],
                Units::Index => i as f64,
            })
            .collect()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// All spectra, wavelength x cycle, outliers included
    #[must_use]
    pub fn spectra(&self) -> ArrayView2<'_, f64> {
        self.spectra.view()
    }

    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[must_use]
    pub fn cycle_time(&self) -> Option<f64> {
        self.cycle_time
    }

    #[must_use]
    pub fn units(&self) -> Units {
        self.units
    }

    #[must_use]
    pub fn n_cycles(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn combined_trace(&self) -> &[f64] {
        &self.trace
    }

    /// Wavelengths sampled by the combined trace
    #[must_use]
    pub fn trace_wavelengths(&self) -> Vec<f64> {
        self.trace_rows.iter().map(|&r| self.wavelengths[r]).collect()
    }

    #[must_use]
    pub fn baseline(&self) -> &[f64] {
        &self.baseline
    }

    /// Outlier mask (true = outlier)
    #[must_use]
    pub fn outliers(&self) -> &[bool] {
        &self.outliers
    }

    #[must_use]
    pub fn threshold_flags(&self) -> &[bool] {
        &self.threshold_flags
    }

    #[must_use]
    pub fn low_signal_flags(&self) -> &[bool] {
        &self.low_signal_flags
    }

    #[must_use]
    pub fn n_outliers(&self) -> usize {
        self.outliers.iter().filter(|&&o| o).count()
    }

    #[must_use]
    pub fn baseline_iterations(&self) -> usize {
        self.baseline_iterations
    }

    #[must_use]
    pub fn baseline_converged(&self) -> bool {
        self.baseline_converged
    }

    #[must_use]
    pub fn is_view_only(&self) -> bool {
        self.view_only
    }

    /// Options the dataset was processed with, including any trim and slicing applied
    #[must_use]
    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    /// Sliced cycles, if slicing was applied
    #[must_use]
    pub fn selection(&self) -> Option<&[usize]> {
        self.selection.as_deref()
    }

    /// Cycles not flagged as outliers
    #[must_use]
    pub fn retained_indices(&self) -> Vec<usize> {
        retained_cycles(&self.outliers)
    }

    /// Cycles in the cleaned view: the slicing selection, or every retained cycle
    #[must_use]
    pub fn view_indices(&self) -> Vec<usize> {
        match &self.selection {
            Some(selection) => selection.clone(),
            None => self.retained_indices(),
        }
    }

    /// Cleaned spectra (wavelength x cycle) for the cycles in the view
    #[must_use]
    pub fn processed_spectra(&self) -> Array2<f64> {
        self.spectra.select(Axis(1), &self.view_indices())
    }

    #[must_use]
    pub fn processed_times(&self) -> Vec<f64> {
        self.view_indices().iter().map(|&i| self.times[i]).collect()
    }

    /// True when every per-cycle array has one entry per cycle
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        let n = self.spectra.ncols();
        [
            self.times.len(),
            self.trace.len(),
            self.baseline.len(),
            self.outliers.len(),
            self.threshold_flags.len(),
            self.low_signal_flags.len(),
        ]
        .iter()
        .all(|&len| len == n)
            && self
                .selection
                .as_ref()
                .is_none_or(|selection| selection.iter().all(|&i| i < n))
    }

    /// Absorbance over time at specific wavelengths
    ///
    /// Wavelengths missing from the axis are ignored; returns `None` when
    /// none of them are present.
    #[must_use]
    pub fn chosen_traces(&self, wavelengths: &[f64]) -> Option<ChosenTraces> {
        let mut rows: Vec<usize> = wavelengths
            .iter()
            .map(|&wl| (wl, nearest_index(&self.wavelengths, wl)))
            .filter(|&(wl, row)| (self.wavelengths[row] - wl).abs() <= WAVELENGTH_TOLERANCE)
            .map(|(_, row)| row)
            .collect();
        rows.dedup();
        if rows.is_empty() {
            return None;
        }

        let retained = self.retained_indices();
        let raw = self.spectra.select(Axis(0), &rows).reversed_axes();
        let processed = raw.select(Axis(0), &retained);

        Some(ChosenTraces {
            wavelengths: rows.iter().map(|&r| self.wavelengths[r]).collect(),
            raw_times: self.times.clone(),
            raw,
            processed_times: retained.iter().map(|&i| self.times[i]).collect(),
            processed,
        })
    }

    #[must_use]
    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            name: self.name.clone(),
            spectra_found: self.spectra_found,
            cycle_time: self.cycle_time,
            units: self.units,
            outliers_found: self.n_outliers(),
            low_signal_outliers: self.low_signal_flags.iter().filter(|&&f| f).count(),
            trim: self.options.trim,
            slicing: self.options.slicing.as_ref().map(ToString::to_string),
            spectra_remaining: self.view_indices().len(),
            baseline_iterations: self.baseline_iterations,
            baseline_converged: self.baseline_converged,
            view_only: self.view_only,
        }
    }

    /// Write the cleaned spectra as one wide table; returns the path written
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be written.
    pub fn export_processed_csv(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = unique_path(dir, &format!("{} processed", self.name), "csv");
        write_spectra_csv(&path, &self.wavelengths, &self.processed_times(), self.processed_spectra().view())?;
        info!("Exported processed spectra to {}", path.display());
        Ok(path)
    }

    /// Write the cleaned spectra as one table per spectrum into a new directory
    ///
    /// # Errors
    /// Returns an I/O error if the files cannot be written.
    pub fn export_table_directory(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let target = unique_path(dir, &format!("{} spectra", self.name), "");
        let written = write_table_directory(&target, &self.wavelengths, self.processed_spectra().view())?;
        info!("Exported {} spectra to {}", written.len(), target.display());
        Ok(written)
    }

    /// Write the combined trace, baseline and outlier flags
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be written.
    pub fn export_trace_csv(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = unique_path(dir, &format!("{} trace", self.name), "csv");
        write_trace_csv(&path, &self.times, &self.trace, &self.baseline, &self.outliers)?;
        Ok(path)
    }

    /// Write processed absorbance-vs-time traces at the given wavelengths
    ///
    /// Returns `None` when none of the wavelengths are on the axis.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be written.
    pub fn export_chosen_traces(&self, dir: impl AsRef<Path>, wavelengths: &[f64]) -> Result<Option<PathBuf>> {
        let Some(traces) = self.chosen_traces(wavelengths) else {
            return Ok(None);
        };
        let path = unique_path(dir, &format!("{} time traces", self.name), "csv");
        write_traces_csv(&path, &traces.processed_times, &traces.wavelengths, traces.processed.view())?;
        Ok(Some(path))
    }

    /// Write the summary as pretty-printed JSON
    ///
    /// # Errors
    /// Returns an I/O or serialization error.
    pub fn export_summary_json(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = unique_path(dir, &format!("{} summary", self.name), "json");
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, &self.summary())?;
        Ok(path)
    }
}

/// Equality of the data; the options that produced it are not compared
impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.wavelengths == other.wavelengths
            && self.spectra == other.spectra
            && self.times == other.times
            && self.cycle_time == other.cycle_time
            && self.units == other.units
            && self.trace == other.trace
            && self.baseline == other.baseline
            && self.outliers == other.outliers
            && self.threshold_flags == other.threshold_flags
            && self.low_signal_flags == other.low_signal_flags
            && self.selection == other.selection
    }
}

fn analyze(
    wavelengths: &[f64],
    spectra: ArrayView2<f64>,
    trace_config: &TraceConfig,
    outlier_config: &OutlierConfig,
    baseline_config: &BaselineConfig,
    view_only: bool,
) -> Result<Analysis> {
    let trace = build_combined_trace(wavelengths, spectra, trace_config)?;
    let n = trace.values.len();

    let outliers = if view_only {
        OutlierResult {
            mask: vec![false; n],
            threshold_flags: vec![false; n],
            low_signal_flags: vec![false; n],
            baseline: trace.values.clone(),
            iterations: 0,
            converged: true,
        }
    } else {
        find_outliers(&trace.values, spectra, outlier_config, baseline_config)?
    };

    if outliers.mask.len() != n {
        return Err(UvProError::StatsError(format!(
            "outlier mask has {} entries for {} cycles",
            outliers.mask.len(),
            n
        )));
    }

    Ok(Analysis {
        trace: trace.values,
        trace_rows: trace.rows,
        outliers,
    })
}

fn retained_cycles(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter(|&(_, &outlier)| !outlier)
        .map(|(i, _)| i)
        .collect()
}

/// Absorbance-vs-time at chosen wavelengths, laid out cycle x wavelength
#[derive(Debug, Clone, PartialEq)]
pub struct ChosenTraces {
    pub wavelengths: Vec<f64>,
    /// Every cycle
    pub raw: Array2<f64>,
    pub raw_times: Vec<f64>,
    /// Cycles not flagged as outliers
    pub processed: Array2<f64>,
    pub processed_times: Vec<f64>,
}

/// Outcome of processing one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub spectra_found: usize,
    pub cycle_time: Option<f64>,
    pub units: Units,
    pub outliers_found: usize,
    pub low_signal_outliers: usize,
    pub trim: Option<TrimRange>,
    pub slicing: Option<String>,
    pub spectra_remaining: usize,
    pub baseline_iterations: usize,
    pub baseline_converged: bool,
    pub view_only: bool,
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source: {}", self.name)?;
        writeln!(f, "Spectra found: {}", self.spectra_found)?;
        match self.cycle_time {
            Some(ct) => writeln!(f, "Cycle time (s): {ct}")?,
            None => writeln!(f, "Cycle time (s): unknown")?,
        }
        if self.view_only {
            return write!(f, "View only: no outlier analysis");
        }
        writeln!(
            f,
            "Outliers found: {} ({} low signal)",
            self.outliers_found, self.low_signal_outliers
        )?;
        if let Some(trim) = &self.trim {
            writeln!(f, "Data range: {trim}")?;
        }
        if let Some(slicing) = &self.slicing {
            writeln!(f, "Slicing: {slicing}")?;
        }
        if !self.baseline_converged {
            writeln!(
                f,
                "Baseline: stopped after {} iterations without converging",
                self.baseline_iterations
            )?;
        }
        write!(f, "Spectra remaining: {}", self.spectra_remaining)
    }
}
