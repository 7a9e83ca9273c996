//! Outlier classification scenarios
//!
//! Synthetic runs with known artifacts, checked end to end through
//! `Dataset::from_raw`.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uvpro_rs::stats::median;
use uvpro_rs::{
    build_combined_trace, BaselineInput, Dataset, LowSignalWindow, ProcessingOptions, RawSpectra,
    ThresholdMode, TraceConfig,
};

fn wavelengths() -> Vec<f64> {
    (300..=400).map(f64::from).collect()
}

fn trace_config() -> TraceConfig {
    TraceConfig {
        min_wavelength: 300.0,
        max_wavelength: 400.0,
        interval: 10.0,
        saturation_limit: None,
    }
}

fn options() -> ProcessingOptions {
    ProcessingOptions {
        trace: trace_config(),
        ..Default::default()
    }
}

/// Spectra around 1 AU with small random jitter
fn noisy_run(n_cycles: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((wavelengths().len(), n_cycles), |_| 1.0 + rng.random_range(-0.01..0.01))
}

fn raw(spectra: Array2<f64>) -> RawSpectra {
    let times = (0..spectra.ncols()).map(|i| i as f64).collect();
    RawSpectra::new("synthetic", wavelengths(), spectra, times, None).unwrap()
}

/// Ten cycles; the last jumps by ten times the typical trace value
fn offset_last_column() -> Array2<f64> {
    let mut spectra = noisy_run(10, 7);
    let quiet = build_combined_trace(&wavelengths(), spectra.view(), &trace_config()).unwrap();
    let typical = median(&quiet.values[..9]).unwrap();

    let offset = 10.0 * typical / quiet.rows.len() as f64;
    let previous = spectra.column(8).to_owned();
    spectra.column_mut(9).assign(&(previous + offset));
    spectra
}

/// A run with one cycle whose absorbance collapses to near zero
fn run_with_gap(n_cycles: usize, gap: usize) -> Array2<f64> {
    let mut spectra = noisy_run(n_cycles, 11);
    spectra.column_mut(gap).fill(0.001);
    spectra
}

fn flagged(flags: &[bool]) -> Vec<usize> {
    flags
        .iter()
        .enumerate()
        .filter(|&(_, &f)| f)
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn test_offset_column_is_flagged() {
    let dataset = Dataset::from_raw(raw(offset_last_column()), &options()).unwrap();
    assert!(dataset.outliers()[9], "offset cycle should be an outlier");
    assert!(dataset.threshold_flags()[9]);
    assert!(dataset.is_aligned());
}

#[test]
fn test_large_threshold_flags_nothing() {
    let mut options = options();
    options.outliers.threshold = 1000.0;
    let dataset = Dataset::from_raw(raw(offset_last_column()), &options).unwrap();
    assert!(dataset.threshold_flags().iter().all(|&f| !f));
    assert_eq!(dataset.n_outliers(), 0);
}

/// Constant run with one spiked cycle in the middle
fn spiked_run(n_cycles: usize) -> Array2<f64> {
    let mut spectra = noisy_run(n_cycles, 5);
    spectra.column_mut(n_cycles / 2).mapv_inplace(|v| v + 0.5);
    spectra
}

/// Decaying band with jitter and mixing spikes every 25 cycles
fn decaying_run(n_cycles: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(21);
    Array2::from_shape_fn((wavelengths().len(), n_cycles), |(r, c)| {
        let band = (-((r as f64 - 50.0) / 20.0).powi(2)).exp();
        let spike = if c % 25 == 12 { 0.3 } else { 0.0 };
        0.1 + band * (-(c as f64) / 40.0).exp() + spike + rng.random_range(-0.002..0.002)
    })
}

#[test]
fn test_threshold_of_one_or_more_flags_nothing_for_any_fit() {
    let runs = [
        ("offset", offset_last_column()),
        ("spiked", spiked_run(500)),
        ("decaying", decaying_run(120)),
    ];

    for (shape, spectra) in &runs {
        for lambda in [1.0, 10.0, 1e2, 1e3, 1e4] {
            for threshold in [1.0, 2.0, 5.0, 1000.0] {
                let mut options = options();
                options.baseline.lambda = lambda;
                options.outliers.threshold = threshold;
                let dataset = Dataset::from_raw(raw(spectra.clone()), &options).unwrap();
                assert!(
                    dataset.threshold_flags().iter().all(|&f| !f),
                    "{shape}: lambda {lambda}, threshold {threshold} flagged {:?}",
                    flagged(dataset.threshold_flags())
                );
                assert_eq!(dataset.n_outliers(), 0);
            }

            // Below 1 the largest deviation is always caught
            let mut options = options();
            options.baseline.lambda = lambda;
            options.outliers.threshold = 0.5;
            let dataset = Dataset::from_raw(raw(spectra.clone()), &options).unwrap();
            assert!(dataset.n_outliers() > 0, "{shape}: lambda {lambda}");
        }
    }
}

#[test]
fn test_peak_normalized_threshold_of_one_flags_nothing() {
    let mut options = options();
    options.outliers.mode = ThresholdMode::PeakNormalized;
    options.outliers.threshold = 1.0;
    let dataset = Dataset::from_raw(raw(offset_last_column()), &options).unwrap();
    assert!(dataset.threshold_flags().iter().all(|&f| !f));

    options.outliers.threshold = 0.5;
    let dataset = Dataset::from_raw(raw(offset_last_column()), &options).unwrap();
    assert!(dataset.threshold_flags()[9]);
}

#[test]
fn test_narrow_flags_exactly_the_gap() {
    let options = options().with_low_signal_window(LowSignalWindow::Narrow);
    let dataset = Dataset::from_raw(raw(run_with_gap(30, 12)), &options).unwrap();
    assert_eq!(flagged(dataset.low_signal_flags()), vec![12]);
    assert!(dataset.outliers()[12]);
}

#[test]
fn test_wide_adds_neighbours() {
    let options = options().with_low_signal_window(LowSignalWindow::Wide);
    let dataset = Dataset::from_raw(raw(run_with_gap(30, 12)), &options).unwrap();
    assert_eq!(flagged(dataset.low_signal_flags()), vec![11, 12, 13]);
    for i in [11, 12, 13] {
        assert!(dataset.outliers()[i]);
    }
}

#[test]
fn test_none_ignores_low_signal() {
    let dataset = Dataset::from_raw(raw(run_with_gap(30, 12)), &options()).unwrap();
    assert!(dataset.low_signal_flags().iter().all(|&f| !f));
}

#[test]
fn test_wide_is_superset_of_narrow() {
    for seed in 0..5 {
        let mut spectra = noisy_run(60, seed);
        let mut rng = StdRng::seed_from_u64(seed + 100);
        for _ in 0..4 {
            let gap = rng.random_range(0..60);
            spectra.column_mut(gap).fill(0.0);
        }

        let narrow = Dataset::from_raw(
            raw(spectra.clone()),
            &options().with_low_signal_window(LowSignalWindow::Narrow),
        )
        .unwrap();
        let wide = Dataset::from_raw(raw(spectra), &options().with_low_signal_window(LowSignalWindow::Wide)).unwrap();

        for (n, w) in narrow.low_signal_flags().iter().zip(wide.low_signal_flags()) {
            assert!(!n || *w, "wide must keep every narrow flag (seed {seed})");
        }
        assert!(flagged(wide.low_signal_flags()).len() >= flagged(narrow.low_signal_flags()).len());
    }
}

#[test]
fn test_both_baseline_orderings() {
    let spectra = run_with_gap(40, 20);

    for (window, expected) in [
        (LowSignalWindow::Narrow, vec![20]),
        (LowSignalWindow::Wide, vec![19, 20, 21]),
    ] {
        let mut exclude = options().with_low_signal_window(window);
        exclude.outliers.baseline_input = BaselineInput::ExcludeLowSignal;
        let excluded = Dataset::from_raw(raw(spectra.clone()), &exclude).unwrap();

        let mut all = exclude.clone();
        all.outliers.baseline_input = BaselineInput::AllCycles;
        let included = Dataset::from_raw(raw(spectra.clone()), &all).unwrap();

        // Low-signal flags do not depend on the ordering
        assert_eq!(excluded.low_signal_flags(), included.low_signal_flags());
        assert_eq!(flagged(excluded.low_signal_flags()), expected);
        for &i in &expected {
            assert!(excluded.outliers()[i] && included.outliers()[i]);
        }

        // The fit does
        assert_ne!(excluded.baseline(), included.baseline(), "{window}");
        assert!(excluded.is_aligned() && included.is_aligned());
    }

    // Wide neighbours are left out of the fit along with the gap itself
    let narrow = Dataset::from_raw(
        raw(spectra.clone()),
        &options().with_low_signal_window(LowSignalWindow::Narrow),
    )
    .unwrap();
    let wide = Dataset::from_raw(raw(spectra), &options().with_low_signal_window(LowSignalWindow::Wide)).unwrap();
    assert_ne!(narrow.baseline(), wide.baseline());
}

#[test]
fn test_iteration_cap_is_not_fatal() {
    let mut options = options();
    options.baseline.tolerance = 1e-300;
    options.baseline.max_iterations = 2;
    let dataset = Dataset::from_raw(raw(offset_last_column()), &options).unwrap();
    assert!(!dataset.baseline_converged());
    assert_eq!(dataset.baseline_iterations(), 2);
    assert_eq!(dataset.baseline().len(), 10);
}
