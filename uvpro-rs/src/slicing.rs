//! Reduction of a run to a few representative spectra
//!
//! Slicing never removes data. It selects positions into the list of retained
//! (non-outlier) cycles, and the dataset exposes the selection as a view.

use crate::error::{Result, UvProError};
use crate::trace::nearest_index;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// How to pick representative spectra
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SliceSpec {
    /// `count` spectra evenly spaced over the retained cycles
    Equal { count: usize },
    /// Steps of `round(coefficient · x^exponent + 1)` for the x-th slice
    Gradient { coefficient: f64, exponent: f64 },
    /// The retained cycle nearest to each requested time (in dataset units)
    Manual { times: Vec<f64> },
}

impl SliceSpec {
    /// # Errors
    /// Returns `InvalidSliceParameter` for a zero count, a non-positive or
    /// non-finite coefficient, a non-finite exponent, or an empty or
    /// non-finite list of manual times.
    pub fn validate(&self) -> Result<()> {
        match self {
            SliceSpec::Equal { count } => {
                if *count == 0 {
                    return Err(UvProError::InvalidSliceParameter(
                        "number of slices must be at least 1".to_string(),
                    ));
                }
            }
            SliceSpec::Gradient {
                coefficient,
                exponent,
            } => {
                if !(coefficient.is_finite() && *coefficient > 0.0) {
                    return Err(UvProError::InvalidSliceParameter(format!(
                        "gradient coefficient must be a positive number, got {coefficient}"
                    )));
                }
                if !exponent.is_finite() {
                    return Err(UvProError::InvalidSliceParameter(format!(
                        "gradient exponent must be finite, got {exponent}"
                    )));
                }
            }
            SliceSpec::Manual { times } => {
                if times.is_empty() {
                    return Err(UvProError::InvalidSliceParameter(
                        "manual slicing needs at least one time".to_string(),
                    ));
                }
                if times.iter().any(|t| !t.is_finite()) {
                    return Err(UvProError::InvalidSliceParameter(
                        "manual slice times must be finite".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Select positions into `retained`, the time (or index) of each retained cycle
    ///
    /// The returned positions are strictly increasing.
    ///
    /// # Errors
    /// Returns `InvalidSliceParameter` if the slicing parameters are invalid.
    pub fn positions(&self, retained: &[f64]) -> Result<Vec<usize>> {
        self.validate()?;
        let m = retained.len();
        let positions = match self {
            SliceSpec::Equal { count } => equal_positions(m, *count),
            SliceSpec::Gradient {
                coefficient,
                exponent,
            } => gradient_positions(m, *coefficient, *exponent),
            SliceSpec::Manual { times } => manual_positions(retained, times),
        };
        debug!("{} kept {} of {} cycles", self, positions.len(), m);
        Ok(positions)
    }
}

impl fmt::Display for SliceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceSpec::Equal { count } => write!(f, "equal slicing ({count} slices)"),
            SliceSpec::Gradient {
                coefficient,
                exponent,
            } => write!(f, "gradient slicing (a = {coefficient}, b = {exponent})"),
            SliceSpec::Manual { times } => write!(f, "manual slicing ({} times)", times.len()),
        }
    }
}

/// `count` evenly spaced positions in `0..m`
///
/// First and last are always included for `count >= 2`; `count >= m` keeps
/// every position and `count == 1` keeps the first.
#[must_use]
pub fn equal_positions(m: usize, count: usize) -> Vec<usize> {
    if m == 0 || count == 0 {
        return Vec::new();
    }
    if count >= m {
        return (0..m).collect();
    }
    if count == 1 {
        return vec![0];
    }

    let span = (m - 1) as f64;
    let steps = (count - 1) as f64;
    let mut positions: Vec<usize> = (0..count)
        .map(|k| (k as f64 * span / steps).round() as usize)
        .collect();
    positions.dedup();
    positions
}

/// Geometrically spaced positions in `0..m`
///
/// Starting at 0, the x-th step advances by `round(a · x^b + 1)` (at least 1).
/// The final position `m - 1` is always included.
#[must_use]
pub fn gradient_positions(m: usize, coefficient: f64, exponent: f64) -> Vec<usize> {
    if m == 0 {
        return Vec::new();
    }
    let last = m - 1;
    let mut positions = vec![0];
    let mut position = 0_usize;
    let mut x = 1_u32;

    loop {
        let step = (coefficient * f64::from(x).powf(exponent) + 1.0).round();
        // Non-finite or oversized steps run straight to the end
        if !step.is_finite() || step >= last as f64 {
            break;
        }
        position = position.saturating_add((step as usize).max(1));
        if position >= last {
            break;
        }
        positions.push(position);
        x = x.saturating_add(1);
    }

    if last > 0 {
        positions.push(last);
    }
    positions
}

/// Position of the retained cycle nearest to each requested time, deduplicated
#[must_use]
pub fn manual_positions(retained: &[f64], times: &[f64]) -> Vec<usize> {
    if retained.is_empty() {
        return Vec::new();
    }
    let mut positions: Vec<usize> = times.iter().map(|&t| nearest_index(retained, t)).collect();
    positions.sort_unstable();
    positions.dedup();
    positions
}
