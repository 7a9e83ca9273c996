use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use uvpro_rs::{
    Dataset, DatasetSummary, LowSignalWindow, ProcessingOptions, SliceSpec, ThresholdMode,
    TrimRange,
};

mod settings;

use settings::Settings;

/// uvpro - Outlier-aware cleaning of time-resolved UV-vis spectra
#[derive(Parser, Debug)]
#[command(author, version, long_about = None)]
#[command(name = "uvpro")]
#[command(about = "Find artifact spectra in UV-vis kinetics runs and reduce them to clean spectra")]
struct Cli {
    /// Settings file (default: ~/.config/uvpro/settings.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process .KD files or directories of spectrum tables
    Process(ProcessArgs),

    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the settings file location and its values
    List,
    /// Set one value, e.g. `uvpro config set trace_window 300,900`
    Set { key: String, value: String },
    /// Restore the default settings
    Reset,
    /// Remove the settings file
    Delete,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// .KD files, directories of .csv tables, or directories searched for .KD files
    /// Relative paths are resolved against the configured root directory
    #[arg(value_name = "INPUTS", required = true)]
    input: Vec<PathBuf>,

    /// Output directory for exported files
    /// Defaults to the directory containing each input
    #[arg(short, long, value_name = "OUTPUT_DIR")]
    output: Option<PathBuf>,

    /// Outlier threshold - Higher = less strict
    #[arg(short, long)]
    threshold: Option<f64>,

    /// How the threshold is compared against the residual
    #[arg(long, value_enum)]
    threshold_mode: Option<ThresholdModeArg>,

    /// Baseline smoothness (lambda)
    #[arg(long)]
    smoothness: Option<f64>,

    /// Baseline convergence tolerance
    #[arg(long)]
    tolerance: Option<f64>,

    /// Low-signal outlier detection window
    #[arg(short, long, value_enum)]
    low_signal: Option<LowSignalArg>,

    /// Wavelength window for the combined trace (e.g., "300,1060")
    #[arg(long, value_delimiter = ',', value_name = "MIN,MAX")]
    trace_window: Option<Vec<f64>>,

    /// Wavelength step between trace rows in nm
    #[arg(long)]
    trace_interval: Option<f64>,

    /// Cycle time in seconds for table directories (containers carry their own)
    #[arg(long)]
    cycle_time: Option<f64>,

    /// Keep only cycles in FIRST..LAST, in seconds when the cycle time is known
    /// A negative LAST keeps everything from FIRST onward
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, value_name = "FIRST,LAST")]
    trim: Option<Vec<f64>>,

    /// Reduce to N evenly spaced spectra
    #[arg(short, long, value_name = "N", conflicts_with_all = ["gradient", "slice_times"])]
    slices: Option<usize>,

    /// Reduce with gradient spacing a*x^b (e.g., "1,1.5")
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, value_name = "A,B", conflicts_with = "slice_times")]
    gradient: Option<Vec<f64>>,

    /// Reduce to the spectra nearest these times (comma-separated)
    #[arg(long, value_delimiter = ',')]
    slice_times: Option<Vec<f64>>,

    /// Load and summarize without outlier analysis
    #[arg(long)]
    view_only: bool,

    /// Export processed spectra as one wide CSV
    #[arg(long)]
    export_processed: bool,

    /// Export processed spectra as a directory of per-spectrum tables
    #[arg(long)]
    export_tables: bool,

    /// Export the combined trace, baseline and outlier flags
    #[arg(long)]
    export_trace: bool,

    /// Export absorbance-vs-time at these wavelengths (comma-separated, nm)
    #[arg(short, long, value_delimiter = ',')]
    wavelengths: Option<Vec<f64>>,

    /// Save a JSON report of all processed inputs
    #[arg(long, value_name = "REPORT_PATH")]
    report: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LowSignalArg {
    /// Ignore low-signal spectra
    None,
    /// Flag low-signal spectra only
    Narrow,
    /// Flag low-signal spectra and their neighbours
    Wide,
}

impl From<LowSignalArg> for LowSignalWindow {
    fn from(window: LowSignalArg) -> Self {
        match window {
            LowSignalArg::None => LowSignalWindow::None,
            LowSignalArg::Narrow => LowSignalWindow::Narrow,
            LowSignalArg::Wide => LowSignalWindow::Wide,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ThresholdModeArg {
    /// |residual| > threshold * |baseline|
    Baseline,
    /// |residual| / max|residual| > threshold (default)
    Peak,
}

impl From<ThresholdModeArg> for ThresholdMode {
    fn from(mode: ThresholdModeArg) -> Self {
        match mode {
            ThresholdModeArg::Baseline => ThresholdMode::Baseline,
            ThresholdModeArg::Peak => ThresholdMode::PeakNormalized,
        }
    }
}

impl ProcessArgs {
    /// Apply command-line flags on top of the configured defaults
    fn processing_options(&self, defaults: &ProcessingOptions) -> Result<ProcessingOptions> {
        let mut options = defaults.clone();

        if let Some(threshold) = self.threshold {
            options.outliers.threshold = threshold;
        }
        if let Some(mode) = self.threshold_mode {
            options.outliers.mode = mode.into();
        }
        if let Some(lambda) = self.smoothness {
            options.baseline.lambda = lambda;
        }
        if let Some(tolerance) = self.tolerance {
            options.baseline.tolerance = tolerance;
        }
        if let Some(window) = self.low_signal {
            options.outliers.low_signal.window = window.into();
        }
        if let Some(window) = &self.trace_window {
            let (min, max) = pair("--trace-window", window)?;
            options.trace.min_wavelength = min;
            options.trace.max_wavelength = max;
        }
        if let Some(interval) = self.trace_interval {
            options.trace.interval = interval;
        }
        if self.cycle_time.is_some() {
            options.cycle_time = self.cycle_time;
        }
        if let Some(trim) = &self.trim {
            let (first, last) = pair("--trim", trim)?;
            options.trim = Some(TrimRange::new(first, last));
        }
        if let Some(count) = self.slices {
            options.slicing = Some(SliceSpec::Equal { count });
        } else if let Some(gradient) = &self.gradient {
            let (coefficient, exponent) = pair("--gradient", gradient)?;
            options.slicing = Some(SliceSpec::Gradient {
                coefficient,
                exponent,
            });
        } else if let Some(times) = &self.slice_times {
            options.slicing = Some(SliceSpec::Manual {
                times: times.clone(),
            });
        }
        if self.view_only {
            options.view_only = true;
        }

        options.validate()?;
        Ok(options)
    }

    fn exports_anything(&self) -> bool {
        self.export_processed || self.export_tables || self.export_trace || self.wavelengths.is_some()
    }
}

fn pair(flag: &str, values: &[f64]) -> Result<(f64, f64)> {
    match values {
        [a, b] => Ok((*a, *b)),
        _ => bail!("{flag} takes exactly two values, got {}", values.len()),
    }
}

/// Result of processing a single source
#[derive(Debug)]
struct FileResult {
    filename: String,
    summary: Option<DatasetSummary>,
    exported: Vec<PathBuf>,
    processing_time_ms: u128,
    error: Option<String>,
}

fn is_kd_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("kd"))
}

fn is_table_directory(path: &Path) -> Result<bool> {
    for entry in std::fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_file()
            && entry_path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Collect all sources from input paths
///
/// A directory holding `.csv` files is one table source; any other directory
/// is searched recursively for `.KD` containers.
fn collect_sources(inputs: &[PathBuf], root: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut sources = Vec::new();

    for input in inputs {
        let input = match root {
            Some(root) if input.is_relative() => root.join(input),
            _ => input.clone(),
        };

        if input.is_file() {
            if is_kd_file(&input) {
                sources.push(input);
            } else {
                warn!("Skipping {}: not a .KD file", input.display());
            }
        } else if input.is_dir() {
            if is_table_directory(&input)? {
                sources.push(input);
                continue;
            }
            for entry in walkdir::WalkDir::new(&input) {
                let entry = entry?;
                let path = entry.path();
                if path.is_file() && is_kd_file(path) {
                    sources.push(path.to_path_buf());
                }
            }
        } else {
            return Err(anyhow!("Path does not exist: {}", input.display()));
        }
    }

    sources.sort();
    sources.dedup();
    Ok(sources)
}

/// Process a single source, capturing any error in the result
fn process_single_source(
    path: &Path,
    options: &ProcessingOptions,
    args: &ProcessArgs,
) -> FileResult {
    let start_time = Instant::now();
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    match process_source_internal(path, options, args) {
        Ok((summary, exported)) => FileResult {
            filename,
            summary: Some(summary),
            exported,
            processing_time_ms: start_time.elapsed().as_millis(),
            error: None,
        },
        Err(e) => FileResult {
            filename,
            summary: None,
            exported: Vec::new(),
            processing_time_ms: start_time.elapsed().as_millis(),
            error: Some(format!("{e:#}")),
        },
    }
}

fn process_source_internal(
    path: &Path,
    options: &ProcessingOptions,
    args: &ProcessArgs,
) -> Result<(DatasetSummary, Vec<PathBuf>)> {
    let dataset = Dataset::open(path, options)?;
    debug!(
        "{}: {} cycles over {} wavelengths",
        dataset.name(),
        dataset.n_cycles(),
        dataset.wavelengths().len()
    );

    let mut exported = Vec::new();
    if args.exports_anything() {
        let output_dir = match &args.output {
            Some(dir) => dir.clone(),
            None => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        if args.export_processed {
            exported.push(dataset.export_processed_csv(&output_dir)?);
        }
        if args.export_tables {
            let tables = dataset.export_table_directory(&output_dir)?;
            if let Some(dir) = tables.first().and_then(|p| p.parent()) {
                exported.push(dir.to_path_buf());
            }
        }
        if args.export_trace {
            exported.push(dataset.export_trace_csv(&output_dir)?);
        }
        if let Some(wavelengths) = &args.wavelengths {
            match dataset.export_chosen_traces(&output_dir, wavelengths)? {
                Some(traces) => exported.push(traces),
                None => warn!(
                    "{}: none of the wavelengths {:?} are on the axis",
                    dataset.name(),
                    wavelengths
                ),
            }
        }
    }

    Ok((dataset.summary(), exported))
}

fn run_process(args: &ProcessArgs, settings: &Settings, verbose: bool) -> Result<()> {
    println!("🧪 uvpro - UV-vis Spectra Processing");
    println!("====================================\n");

    let start_time = Instant::now();
    let options = args.processing_options(&settings.processing)?;
    let sources = collect_sources(&args.input, settings.root_directory.as_deref())?;

    if sources.is_empty() {
        eprintln!("❌ Error: No .KD files or spectrum tables found");
        std::process::exit(1);
    }

    println!("📂 Found {} source(s) to process\n", sources.len());

    if let Some(ref output_dir) = args.output {
        std::fs::create_dir_all(output_dir)?;
    }

    let progress = if sources.len() > 1 && !verbose {
        let bar = ProgressBar::new(sources.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?,
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let results: Vec<FileResult> = sources
        .par_iter()
        .map(|path| {
            info!("Processing {}", path.display());
            let result = process_single_source(path, &options, args);
            progress.set_message(result.filename.clone());
            progress.inc(1);
            result
        })
        .collect();
    progress.finish_and_clear();

    let total_time = start_time.elapsed().as_secs_f64();
    let successful: Vec<&FileResult> = results.iter().filter(|r| r.error.is_none()).collect();
    let failed: Vec<&FileResult> = results.iter().filter(|r| r.error.is_some()).collect();

    for result in &successful {
        if let Some(summary) = &result.summary {
            println!("📊 {}\n", summary);
        }
        for path in &result.exported {
            println!("   💾 {}", path.display());
        }
    }

    println!("\n✅ Processing Complete!");
    println!("   Processed: {} source(s)", results.len());
    println!("   Successful: {}", successful.len());
    if !failed.is_empty() {
        println!("   Failed: {}", failed.len());
    }
    println!("   ⏱️  Total time: {:.2}s\n", total_time);

    if !failed.is_empty() {
        eprintln!("❌ Errors:");
        for result in &failed {
            eprintln!(
                "   {}: {}",
                result.filename,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        eprintln!();
    }

    if let Some(ref report_path) = args.report {
        let report = serde_json::json!({
            "total_sources": results.len(),
            "successful": successful.len(),
            "failed": failed.len(),
            "total_time_seconds": total_time,
            "options": options,
            "results": results.iter().map(|r| serde_json::json!({
                "filename": r.filename,
                "summary": r.summary,
                "exported": r.exported,
                "processing_time_ms": r.processing_time_ms,
                "error": r.error,
            })).collect::<Vec<_>>(),
        });
        std::fs::write(report_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report to {}", report_path.display()))?;
        info!("Saved report to {}", report_path.display());
    }

    if !failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_config(action: &ConfigAction, path: &Path) -> Result<()> {
    match action {
        ConfigAction::List => {
            let settings = Settings::load(path)?;
            println!("⚙️  Settings: {}", path.display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Set { key, value } => {
            let mut settings = Settings::load(path)?;
            settings.set(key, value)?;
            settings.save(path)?;
            println!("✅ {key} = {value}");
        }
        ConfigAction::Reset => {
            Settings::default().save(path)?;
            println!("✅ Settings reset to defaults");
        }
        ConfigAction::Delete => {
            if path.exists() {
                std::fs::remove_file(path)?;
                println!("✅ Deleted {}", path.display());
            } else {
                println!("No settings file at {}", path.display());
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = args.config.clone().unwrap_or_else(Settings::default_path);

    match &args.command {
        Command::Process(process) => {
            let settings = Settings::load(&config_path)?;
            run_process(process, &settings, args.verbose)
        }
        Command::Config { action } => run_config(action, &config_path),
    }
}
