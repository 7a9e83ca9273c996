use crate::error::{Result, UvProError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// How trim and slice values are interpreted
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Units {
    /// Cycle position, starting at 0
    #[default]
    Index,
    /// Acquisition time in seconds
    Seconds,
}

impl Units {
    /// Seconds when the cycle time is known, cycle index otherwise
    #[must_use]
    pub fn for_cycle_time(cycle_time: Option<f64>) -> Self {
        if cycle_time.is_some() {
            Units::Seconds
        } else {
            Units::Index
        }
    }
}

/// An inclusive `[first, last]` interval of cycles
///
/// A negative `last` means "through the final cycle".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimRange {
    pub first: f64,
    pub last: f64,

    /// Interpretation of the bounds; the dataset's own units when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Units>,
}

impl TrimRange {
    #[must_use]
    pub fn new(first: f64, last: f64) -> Self {
        Self {
            first,
            last,
            units: None,
        }
    }

    #[must_use]
    pub fn with_units(mut self, units: Units) -> Self {
        self.units = Some(units);
        self
    }

    /// Check the bounds on their own, before any dataset is involved
    ///
    /// # Errors
    /// Returns `InvalidRange` for non-finite bounds, a negative `first`, or
    /// `last < first` with a non-negative `last`.
    pub fn validate(&self) -> Result<()> {
        if !(self.first.is_finite() && self.last.is_finite()) {
            return Err(UvProError::InvalidRange(format!(
                "trim bounds must be finite, got ({}, {})",
                self.first, self.last
            )));
        }
        if self.first < 0.0 {
            return Err(UvProError::InvalidRange(format!(
                "trim start must not be negative, got {}",
                self.first
            )));
        }
        if self.last >= 0.0 && self.last < self.first {
            return Err(UvProError::InvalidRange(format!(
                "trim end {} is before trim start {}",
                self.last, self.first
            )));
        }
        Ok(())
    }

    /// Contiguous span of cycles whose time (or index) lies within the range
    ///
    /// `times` must be non-decreasing. `dataset_units` applies when the range
    /// carries no units of its own.
    ///
    /// # Errors
    /// - `InvalidRange` if the bounds are malformed
    /// - `UnitMismatch` if seconds are requested without a known cycle time
    /// - `EmptyRange` if no cycle falls in the range
    pub fn resolve(
        &self,
        times: &[f64],
        dataset_units: Units,
        cycle_time: Option<f64>,
    ) -> Result<Range<usize>> {
        self.validate()?;

        let units = self.units.unwrap_or(dataset_units);
        if units == Units::Seconds && cycle_time.is_none() {
            return Err(UvProError::UnitMismatch(
                "trim in seconds needs a known cycle time".to_string(),
            ));
        }

        let position = |i: usize| match units {
            Units::Index => i as f64,
            Units::Seconds => times[i],
        };
        let open_ended = self.last < 0.0;
        let n = times.len();

        let start = (0..n).find(|&i| position(i) >= self.first).unwrap_or(n);
        let end = if open_ended {
            n
        } else {
            (start..n).find(|&i| position(i) > self.last).unwrap_or(n)
        };

        if start >= end {
            return Err(UvProError::EmptyRange {
                first: self.first,
                last: self.last,
            });
        }

        debug!(
            "Trim {} keeps cycles {}..{} of {}",
            self, start, end, n
        );
        Ok(start..end)
    }
}

impl fmt::Display for TrimRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.units {
            Some(Units::Seconds) => " s",
            _ => "",
        };
        if self.last < 0.0 {
            write!(f, "{}{suffix} to end", self.first)
        } else {
            write!(f, "{}{suffix} to {}{suffix}", self.first, self.last)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMES: [f64; 6] = [0.0, 5.0, 10.0, 15.0, 20.0, 25.0];

    #[test]
    fn test_index_range() {
        let range = TrimRange::new(1.0, 3.0).resolve(&TIMES, Units::Index, None).unwrap();
        assert_eq!(range, 1..4);
    }

    #[test]
    fn test_seconds_range() {
        let range = TrimRange::new(7.0, 20.0)
            .resolve(&TIMES, Units::Seconds, Some(5.0))
            .unwrap();
        assert_eq!(range, 2..5);
    }

    #[test]
    fn test_open_ended() {
        let range = TrimRange::new(2.0, -1.0).resolve(&TIMES, Units::Index, None).unwrap();
        assert_eq!(range, 2..6);
    }

    #[test]
    fn test_full_range() {
        let range = TrimRange::new(0.0, 100.0).resolve(&TIMES, Units::Index, None).unwrap();
        assert_eq!(range, 0..6);
    }

    #[test]
    fn test_outside_range_is_empty() {
        let result = TrimRange::new(50.0, 60.0).resolve(&TIMES, Units::Index, None);
        assert!(matches!(result, Err(UvProError::EmptyRange { .. })));

        // Falls between two cycles
        let result = TrimRange::new(6.0, 9.0).resolve(&TIMES, Units::Seconds, Some(5.0));
        assert!(matches!(result, Err(UvProError::EmptyRange { .. })));
    }

    #[test]
    fn test_seconds_without_cycle_time() {
        let result = TrimRange::new(0.0, 10.0)
            .with_units(Units::Seconds)
            .resolve(&TIMES, Units::Index, None);
        assert!(matches!(result, Err(UvProError::UnitMismatch(_))));
    }

    #[test]
    fn test_malformed_bounds() {
        for range in [
            TrimRange::new(5.0, 2.0),
            TrimRange::new(-1.0, 2.0),
            TrimRange::new(f64::NAN, 2.0),
        ] {
            assert!(matches!(range.validate(), Err(UvProError::InvalidRange(_))));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(TrimRange::new(10.0, -1.0).to_string(), "10 to end");
        assert_eq!(
            TrimRange::new(0.0, 30.0).with_units(Units::Seconds).to_string(),
            "0 s to 30 s"
        );
    }
}
