pub mod baseline;
pub mod low_signal;
pub mod outliers;

pub use baseline::{fit_baseline, fit_baseline_masked, BaselineConfig, BaselineFit};
pub use low_signal::{detect_low_signal, total_absorbance, widen, LowSignalConfig, LowSignalWindow};
pub use outliers::{find_outliers, threshold_band, BaselineInput, OutlierConfig, OutlierResult, ThresholdMode};
