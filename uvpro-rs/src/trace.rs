//! Combined time trace
//!
//! The combined trace condenses a run of spectra into one value per cycle: the
//! summed absolute change in absorbance since the previous cycle, taken over a
//! band of sampled wavelengths. Mixing events and cuvette handling show up as
//! spikes in this trace whatever their sign.

use crate::error::{Result, UvProError};
use crate::stats::median;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bound on the wavelengths one trace may sample
pub const MAX_TRACE_SAMPLES: usize = 100_000;

/// Which wavelengths feed the combined trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Lower edge of the wavelength window (nm)
    pub min_wavelength: f64,

    /// Upper edge of the wavelength window (nm), always sampled
    pub max_wavelength: f64,

    /// Spacing between sampled wavelengths (nm)
    pub interval: f64,

    /// Drop wavelengths whose median absorbance reaches this level
    pub saturation_limit: Option<f64>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            min_wavelength: 300.0,
            max_wavelength: 1060.0,
            interval: 10.0,
            saturation_limit: None,
        }
    }
}

impl TraceConfig {
    /// # Errors
    /// Returns `InvalidRange` if the window is reversed or non-finite, the
    /// interval is not a positive number, or the interval is so fine that the
    /// window would need more than [`MAX_TRACE_SAMPLES`] wavelengths.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_wavelength.is_finite() && self.max_wavelength.is_finite()) {
            return Err(UvProError::InvalidRange(format!(
                "trace window ({}, {}) must be finite",
                self.min_wavelength, self.max_wavelength
            )));
        }
        if self.max_wavelength < self.min_wavelength {
            return Err(UvProError::InvalidRange(format!(
                "trace window upper edge {} is below lower edge {}",
                self.max_wavelength, self.min_wavelength
            )));
        }
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(UvProError::InvalidRange(format!(
                "trace interval must be a positive number, got {}",
                self.interval
            )));
        }
        let steps = (self.max_wavelength - self.min_wavelength) / self.interval;
        if !(steps < MAX_TRACE_SAMPLES as f64) {
            return Err(UvProError::InvalidRange(format!(
                "trace interval {} is too fine for the window ({}, {}): at most {MAX_TRACE_SAMPLES} wavelengths",
                self.interval, self.min_wavelength, self.max_wavelength
            )));
        }
        Ok(())
    }

    /// Requested wavelengths: `min, min + Δ, ...` below `max`, then `max`
    ///
    /// # Errors
    /// Returns `InvalidRange` for a configuration rejected by [`Self::validate`].
    pub fn candidate_wavelengths(&self) -> Result<Vec<f64>> {
        self.validate()?;
        // Bounded by validate
        let steps = ((self.max_wavelength - self.min_wavelength) / self.interval).ceil() as usize;
        let mut candidates: Vec<f64> = (0..=steps)
            .map(|k| self.min_wavelength + k as f64 * self.interval)
            .take_while(|&wavelength| wavelength < self.max_wavelength)
            .collect();
        candidates.push(self.max_wavelength);
        Ok(candidates)
    }
}

/// A combined trace and the axis rows it was built from
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedTrace {
    /// One value per cycle
    pub values: Vec<f64>,

    /// Row indices of the sampled wavelengths
    pub rows: Vec<usize>,
}

/// Build the combined time trace of `spectra` (wavelength x cycle)
///
/// The first cycle has no predecessor, so it takes the value of the second.
/// A single cycle yields `[0.0]`.
///
/// # Errors
/// Returns `InvalidRange` if the configuration is invalid, the window misses
/// the wavelength axis entirely, or every sampled wavelength is saturated.
pub fn build_combined_trace(
    wavelengths: &[f64],
    spectra: ArrayView2<f64>,
    config: &TraceConfig,
) -> Result<CombinedTrace> {
    config.validate()?;
    let mut rows = sample_rows(wavelengths, config)?;

    if let Some(limit) = config.saturation_limit {
        let before = rows.len();
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let values = spectra.row(row).to_vec();
            if values.is_empty() || median(&values)? < limit {
                kept.push(row);
            }
        }
        rows = kept;
        debug!(
            "Saturation limit {} removed {} trace wavelengths",
            limit,
            before - rows.len()
        );
        if rows.is_empty() {
            return Err(UvProError::InvalidRange(format!(
                "every wavelength in ({}, {}) reaches the saturation limit {limit}",
                config.min_wavelength, config.max_wavelength
            )));
        }
    }

    let n_cycles = spectra.ncols();
    let mut values = vec![0.0; n_cycles];
    for i in 1..n_cycles {
        values[i] = rows
            .iter()
            .map(|&r| (spectra[[r, i]] - spectra[[r, i - 1]]).abs())
            .sum();
    }
    if n_cycles > 1 {
        values[0] = values[1];
    }

    debug!(
        "Combined trace over {} wavelengths and {} cycles",
        rows.len(),
        n_cycles
    );
    Ok(CombinedTrace { values, rows })
}

/// Map the candidate wavelengths to their nearest rows on the axis
fn sample_rows(wavelengths: &[f64], config: &TraceConfig) -> Result<Vec<usize>> {
    let (Some(&first), Some(&last)) = (wavelengths.first(), wavelengths.last()) else {
        return Err(UvProError::InvalidRange("wavelength axis is empty".to_string()));
    };

    let mut rows: Vec<usize> = config
        .candidate_wavelengths()?
        .into_iter()
        .filter(|&wl| wl >= first && wl <= last)
        .map(|wl| nearest_index(wavelengths, wl))
        .collect();
    rows.dedup();

    if rows.is_empty() {
        return Err(UvProError::InvalidRange(format!(
            "trace window ({}, {}) lies outside the wavelength axis ({first}, {last})",
            config.min_wavelength, config.max_wavelength
        )));
    }
    Ok(rows)
}

/// Index of the value in ascending `axis` closest to `target`
pub(crate) fn nearest_index(axis: &[f64], target: f64) -> usize {
    let upper = axis.partition_point(|&v| v < target);
    if upper == 0 {
        return 0;
    }
    if upper == axis.len() {
        return axis.len() - 1;
    }
    if (axis[upper] - target).abs() < (target - axis[upper - 1]).abs() {
        upper
    } else {
        upper - 1
    }
}
