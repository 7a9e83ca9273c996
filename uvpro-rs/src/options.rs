use crate::error::{Result, UvProError};
use crate::qc::{BaselineConfig, LowSignalWindow, OutlierConfig};
use crate::slicing::SliceSpec;
use crate::trace::TraceConfig;
use crate::trim::TrimRange;
use serde::{Deserialize, Serialize};

/// Every tuning parameter of the processing pipeline
///
/// Defaults: threshold 0.1, smoothness 10, tolerance 0.1, no low-signal
/// detection, trace window 300–1060 nm sampled every 10 nm, no trim and no
/// slicing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub trace: TraceConfig,

    pub outliers: OutlierConfig,

    pub baseline: BaselineConfig,

    pub trim: Option<TrimRange>,

    pub slicing: Option<SliceSpec>,

    /// Cycle time (s) for table sources, which do not record one
    pub cycle_time: Option<f64>,

    /// Load and summarize only: no classification, trimming or slicing
    pub view_only: bool,
}

impl ProcessingOptions {
    /// Check every parameter without touching any data
    ///
    /// # Errors
    /// Returns the first `ConfigError`, `InvalidRange` or
    /// `InvalidSliceParameter` found.
    pub fn validate(&self) -> Result<()> {
        if let Some(ct) = self.cycle_time {
            if !(ct.is_finite() && ct > 0.0) {
                return Err(UvProError::ConfigError(format!(
                    "cycle time must be a positive number of seconds, got {ct}"
                )));
            }
        }
        self.trace.validate()?;
        self.outliers.validate()?;
        self.baseline.validate()?;
        if let Some(trim) = &self.trim {
            trim.validate()?;
        }
        if let Some(slicing) = &self.slicing {
            slicing.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn with_low_signal_window(mut self, window: LowSignalWindow) -> Self {
        self.outliers.low_signal.window = window;
        self
    }

    #[must_use]
    pub fn with_trim(mut self, trim: TrimRange) -> Self {
        self.trim = Some(trim);
        self
    }

    #[must_use]
    pub fn with_slicing(mut self, slicing: SliceSpec) -> Self {
        self.slicing = Some(slicing);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ProcessingOptions::default();
        assert_eq!(options.outliers.threshold, 0.1);
        assert_eq!(options.baseline.lambda, 10.0);
        assert_eq!(options.baseline.tolerance, 0.1);
        assert_eq!(options.outliers.low_signal.window, LowSignalWindow::None);
        assert_eq!((options.trace.min_wavelength, options.trace.max_wavelength), (300.0, 1060.0));
        assert_eq!(options.trace.interval, 10.0);
        assert!(options.trim.is_none() && options.slicing.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let options: ProcessingOptions = serde_json::from_str(
            r#"{"outliers":{"threshold":0.5,"low_signal":{"window":"wide"}},"slicing":{"mode":"equal","count":10}}"#,
        )
        .unwrap();
        assert_eq!(options.outliers.threshold, 0.5);
        assert_eq!(options.outliers.low_signal.window, LowSignalWindow::Wide);
        assert_eq!(options.outliers.low_signal.z_score, 3.5);
        assert_eq!(options.baseline, BaselineConfig::default());
        assert_eq!(options.slicing, Some(SliceSpec::Equal { count: 10 }));
    }

    #[test]
    fn test_validation_reaches_nested_sections() {
        let mut options = ProcessingOptions::default();
        options.trace.interval = -1.0;
        assert!(matches!(options.validate(), Err(UvProError::InvalidRange(_))));

        let options = ProcessingOptions::default().with_slicing(SliceSpec::Equal { count: 0 });
        assert!(matches!(options.validate(), Err(UvProError::InvalidSliceParameter(_))));

        let mut options = ProcessingOptions::default();
        options.baseline.lambda = f64::INFINITY;
        assert!(matches!(options.validate(), Err(UvProError::ConfigError(_))));

        let options = ProcessingOptions {
            cycle_time: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(UvProError::ConfigError(_))));
    }
}
