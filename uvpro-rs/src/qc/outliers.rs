use crate::error::{Result, UvProError};
use crate::qc::baseline::{fit_baseline_masked, BaselineConfig};
use crate::qc::low_signal::{detect_low_signal, widen, LowSignalConfig, LowSignalWindow};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Share of flagged cycles above which the classification is reported as suspicious
const SUSPICIOUS_FRACTION: f64 = 0.7;

/// How the residual `trace - baseline` is compared with the threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// `|trace - baseline| > threshold · |baseline|`
    ///
    /// The asymmetric baseline hugs the lower envelope of the trace, so a
    /// spike can exceed any multiple of it; no threshold rules out flags here.
    Baseline,
    /// `|trace - baseline| / max |trace - baseline| > threshold`
    ///
    /// Normalized residuals never exceed 1, so a threshold of 1 or more flags
    /// nothing.
    #[default]
    PeakNormalized,
}

/// Whether low-signal cycles take part in the baseline fit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineInput {
    /// Low-signal cycles, with their neighbours in wide mode, get zero weight in the fit
    #[default]
    ExcludeLowSignal,
    /// The fit sees every cycle; low-signal flags are only merged afterwards
    AllCycles,
}

/// Configuration for outlier classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Threshold band width; smaller values flag more cycles
    pub threshold: f64,

    pub mode: ThresholdMode,

    pub low_signal: LowSignalConfig,

    pub baseline_input: BaselineInput,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            mode: ThresholdMode::PeakNormalized,
            low_signal: LowSignalConfig::default(),
            baseline_input: BaselineInput::ExcludeLowSignal,
        }
    }
}

impl OutlierConfig {
    /// # Errors
    /// Returns `ConfigError` for a threshold that is not a positive, finite
    /// number, or invalid low-signal constants.
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(UvProError::ConfigError(format!(
                "outlier threshold must be a positive number, got {}",
                self.threshold
            )));
        }
        self.low_signal.validate()
    }
}

/// Result of outlier classification
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierResult {
    /// Merged mask (true = outlier)
    pub mask: Vec<bool>,

    /// Cycles flagged by the threshold band
    pub threshold_flags: Vec<bool>,

    /// Cycles flagged by low-signal detection, after widening
    pub low_signal_flags: Vec<bool>,

    /// Baseline fitted to the combined trace
    pub baseline: Vec<f64>,

    pub iterations: usize,

    pub converged: bool,
}

impl OutlierResult {
    #[must_use]
    pub fn n_outliers(&self) -> usize {
        self.mask.iter().filter(|&&o| o).count()
    }

    /// Percentage of cycles flagged
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.mask.is_empty() {
            0.0
        } else {
            100.0 * self.n_outliers() as f64 / self.mask.len() as f64
        }
    }
}

/// Classify cycles as outliers
///
/// # Algorithm
/// 1. Detect low-signal cycles from the total absorbance of each spectrum
/// 2. Fit the asymmetric baseline to `trace`, leaving out every low-signal
///    cycle (neighbours included in `Wide` mode) when `baseline_input` is
///    `ExcludeLowSignal`
/// 3. Flag cycles outside the threshold band around the baseline
/// 4. Merge: `mask = threshold OR low_signal`
///
/// # Arguments
/// * `trace` - combined time trace, one value per cycle
/// * `spectra` - wavelength x cycle matrix the trace was built from
///
/// # Errors
/// Returns `StatsError` if the trace and matrix disagree in cycle count or
/// the baseline system cannot be solved.
pub fn find_outliers(
    trace: &[f64],
    spectra: ArrayView2<f64>,
    config: &OutlierConfig,
    baseline_config: &BaselineConfig,
) -> Result<OutlierResult> {
    let n = trace.len();
    if spectra.ncols() != n {
        return Err(UvProError::StatsError(format!(
            "trace has {} cycles but the spectra have {}",
            n,
            spectra.ncols()
        )));
    }

    let narrow = detect_low_signal(
        spectra,
        &LowSignalConfig {
            window: match config.low_signal.window {
                LowSignalWindow::None => LowSignalWindow::None,
                _ => LowSignalWindow::Narrow,
            },
            ..config.low_signal.clone()
        },
    )?;
    let low_signal_flags = match config.low_signal.window {
        LowSignalWindow::Wide => widen(&narrow),
        _ => narrow,
    };

    let excluded = match config.baseline_input {
        BaselineInput::ExcludeLowSignal => low_signal_flags.clone(),
        BaselineInput::AllCycles => vec![false; n],
    };
    let fit = fit_baseline_masked(trace, &excluded, baseline_config)?;

    let threshold_flags = threshold_band(trace, &fit.baseline, config.threshold, config.mode);

    let mask: Vec<bool> = threshold_flags
        .iter()
        .zip(&low_signal_flags)
        .map(|(&t, &l)| t || l)
        .collect();

    let result = OutlierResult {
        mask,
        threshold_flags,
        low_signal_flags,
        baseline: fit.baseline,
        iterations: fit.iterations,
        converged: fit.converged,
    };

    debug!(
        "Threshold band flagged {}, low-signal flagged {}",
        result.threshold_flags.iter().filter(|&&f| f).count(),
        result.low_signal_flags.iter().filter(|&&f| f).count()
    );
    info!(
        "Outlier classification: {} of {} cycles flagged ({:.1}%)",
        result.n_outliers(),
        n,
        result.percentage()
    );
    if n > 0 && result.n_outliers() as f64 > SUSPICIOUS_FRACTION * n as f64 {
        warn!(
            "{:.1}% of cycles were flagged as outliers; check the threshold and trace window",
            result.percentage()
        );
    }

    Ok(result)
}

/// Threshold band test of `trace` against `baseline`
#[must_use]
pub fn threshold_band(trace: &[f64], baseline: &[f64], threshold: f64, mode: ThresholdMode) -> Vec<bool> {
    let residuals: Vec<f64> = trace
        .iter()
        .zip(baseline)
        .map(|(t, b)| (t - b).abs())
        .collect();

    match mode {
        ThresholdMode::Baseline => residuals
            .iter()
            .zip(baseline)
            .map(|(r, b)| *r > threshold * b.abs())
            .collect(),
        ThresholdMode::PeakNormalized => {
            let peak = residuals.iter().copied().fold(0.0_f64, f64::max);
            if peak <= 0.0 {
                return vec![false; residuals.len()];
            }
            residuals.iter().map(|r| r / peak > threshold).collect()
        }
    }
}
