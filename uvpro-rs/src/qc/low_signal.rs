use crate::error::{Result, UvProError};
use crate::stats::median_mad_scaled;
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::debug;

/// How low-signal cycles contribute to the outlier mask
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LowSignalWindow {
    /// Low-signal detection is disabled
    #[default]
    None,
    /// Flag only the low-signal cycles themselves
    Narrow,
    /// Also flag the cycle before and after each low-signal cycle
    Wide,
}

/// Constants of the low-signal statistic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowSignalConfig {
    pub window: LowSignalWindow,

    /// A cycle must sum to less than this fraction of the median total
    pub fraction: f64,

    /// ...and lie more than this many robust standard deviations below it
    pub z_score: f64,
}

impl Default for LowSignalConfig {
    fn default() -> Self {
        Self {
            window: LowSignalWindow::None,
            fraction: 0.1,
            z_score: 3.5,
        }
    }
}

impl LowSignalConfig {
    /// # Errors
    /// Returns `ConfigError` if either constant is negative or non-finite.
    pub fn validate(&self) -> Result<()> {
        if !(self.fraction.is_finite() && self.fraction >= 0.0) {
            return Err(UvProError::ConfigError(format!(
                "low-signal fraction must be a non-negative number, got {}",
                self.fraction
            )));
        }
        if !(self.z_score.is_finite() && self.z_score >= 0.0) {
            return Err(UvProError::ConfigError(format!(
                "low-signal z-score must be a non-negative number, got {}",
                self.z_score
            )));
        }
        Ok(())
    }
}

/// Per-cycle total absorbance over the whole spectrum
///
/// `spectra` is laid out wavelength x cycle.
#[must_use]
pub fn total_absorbance(spectra: ArrayView2<f64>) -> Vec<f64> {
    spectra.sum_axis(Axis(0)).to_vec()
}

/// Flag cycles whose total absorbance collapses towards zero
///
/// A cycle is flagged when its total `S_i` is below `fraction · median(S)` and
/// its robust z-score `(S_i - median) / (1.4826 · MAD)` is below `-z_score`.
/// With a zero MAD every cycle under the median passes the z-score test.
/// Runs whose median total is not positive produce no flags. The window
/// setting is applied on top: `None` flags nothing, `Wide` widens each flag
/// to its neighbours.
///
/// # Errors
/// Returns `StatsError` if the statistic cannot be computed.
pub fn detect_low_signal(spectra: ArrayView2<f64>, config: &LowSignalConfig) -> Result<Vec<bool>> {
    let n_cycles = spectra.ncols();
    if config.window == LowSignalWindow::None || n_cycles == 0 {
        return Ok(vec![false; n_cycles]);
    }

    let totals = total_absorbance(spectra);
    let narrow = flag_low_totals(&totals, config)?;
    let flags = match config.window {
        LowSignalWindow::Wide => widen(&narrow),
        _ => narrow,
    };

    debug!(
        "Low-signal detection ({}) flagged {} of {} cycles",
        config.window,
        flags.iter().filter(|&&f| f).count(),
        n_cycles
    );
    Ok(flags)
}

fn flag_low_totals(totals: &[f64], config: &LowSignalConfig) -> Result<Vec<bool>> {
    let (med, sigma) = median_mad_scaled(totals)?;
    if med <= 0.0 {
        return Ok(vec![false; totals.len()]);
    }

    let cutoff = config.fraction * med;
    Ok(totals
        .iter()
        .map(|&s| {
            let far_below = if sigma > 0.0 {
                (s - med) / sigma < -config.z_score
            } else {
                s < med
            };
            s < cutoff && far_below
        })
        .collect())
}

/// Extend every flag to the cycle before and after it
#[must_use]
pub fn widen(flags: &[bool]) -> Vec<bool> {
    let n = flags.len();
    let mut widened = flags.to_vec();
    for (i, _) in flags.iter().enumerate().filter(|&(_, &f)| f) {
        if i > 0 {
            widened[i - 1] = true;
        }
        if i + 1 < n {
            widened[i + 1] = true;
        }
    }
    widened
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::str::FromStr;

    fn run_with_gap(gap: usize) -> Array2<f64> {
        let mut spectra = Array2::from_shape_fn((50, 12), |(r, c)| 0.5 + 0.001 * (r + c) as f64);
        spectra.column_mut(gap).fill(0.0001);
        spectra
    }

    fn config(window: LowSignalWindow) -> LowSignalConfig {
        LowSignalConfig {
            window,
            ..Default::default()
        }
    }

    #[test]
    fn test_window_parsing() {
        assert_eq!(LowSignalWindow::from_str("none").unwrap(), LowSignalWindow::None);
        assert_eq!(LowSignalWindow::from_str("Narrow").unwrap(), LowSignalWindow::Narrow);
        assert_eq!(LowSignalWindow::from_str("WIDE").unwrap(), LowSignalWindow::Wide);
        assert!(LowSignalWindow::from_str("medium").is_err());
        assert_eq!(LowSignalWindow::Wide.to_string(), "wide");
    }

    #[test]
    fn test_none_flags_nothing() {
        let flags = detect_low_signal(run_with_gap(4).view(), &config(LowSignalWindow::None)).unwrap();
        assert!(flags.iter().all(|&f| !f));
    }

    #[test]
    fn test_narrow_flags_only_the_gap() {
        let flags = detect_low_signal(run_with_gap(4).view(), &config(LowSignalWindow::Narrow)).unwrap();
        let flagged: Vec<usize> = (0..flags.len()).filter(|&i| flags[i]).collect();
        assert_eq!(flagged, vec![4]);
    }

    #[test]
    fn test_wide_adds_neighbours() {
        let flags = detect_low_signal(run_with_gap(4).view(), &config(LowSignalWindow::Wide)).unwrap();
        let flagged: Vec<usize> = (0..flags.len()).filter(|&i| flags[i]).collect();
        assert_eq!(flagged, vec![3, 4, 5]);
    }

    #[test]
    fn test_wide_at_edges() {
        assert_eq!(widen(&[true, false, false]), vec![true, true, false]);
        assert_eq!(widen(&[false, false, true]), vec![false, true, true]);
    }

    #[test]
    fn test_uniform_run_has_no_flags() {
        let spectra = Array2::from_elem((10, 8), 1.0);
        let flags = detect_low_signal(spectra.view(), &config(LowSignalWindow::Narrow)).unwrap();
        assert!(flags.iter().all(|&f| !f));
    }

    #[test]
    fn test_non_positive_median_has_no_flags() {
        let mut spectra = Array2::from_elem((10, 8), -1.0);
        spectra.column_mut(2).fill(-100.0);
        let flags = detect_low_signal(spectra.view(), &config(LowSignalWindow::Narrow)).unwrap();
        assert!(flags.iter().all(|&f| !f));
    }
}
