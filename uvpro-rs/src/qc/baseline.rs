use crate::error::{Result, UvProError};
use crate::stats::{second_difference_penalty, solve_penalized};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Configuration for the asymmetric least-squares baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Smoothness λ, the weight of the second-difference roughness penalty
    pub lambda: f64,

    /// Relative change in the baseline below which the fit has converged
    pub tolerance: f64,

    /// Weight given to points above the baseline (points below get `1 - p`)
    pub asymmetry: f64,

    /// Hard cap on reweighting iterations
    pub max_iterations: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            lambda: 10.0,
            tolerance: 0.1,
            asymmetry: 0.01,
            max_iterations: 50,
        }
    }
}

impl BaselineConfig {
    /// # Errors
    /// Returns `ConfigError` for non-positive or non-finite λ/ε, a zero
    /// iteration cap, or an asymmetry outside (0, 0.5].
    pub fn validate(&self) -> Result<()> {
        if !(self.lambda.is_finite() && self.lambda > 0.0) {
            return Err(UvProError::ConfigError(format!(
                "baseline smoothness must be a positive number, got {}",
                self.lambda
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(UvProError::ConfigError(format!(
                "baseline tolerance must be a positive number, got {}",
                self.tolerance
            )));
        }
        if !(self.asymmetry > 0.0 && self.asymmetry <= 0.5) {
            return Err(UvProError::ConfigError(format!(
                "baseline asymmetry must be in (0, 0.5], got {}",
                self.asymmetry
            )));
        }
        if self.max_iterations == 0 {
            return Err(UvProError::ConfigError(
                "baseline iteration cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a baseline fit
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineFit {
    /// Baseline aligned with the input trace
    pub baseline: Vec<f64>,

    /// Number of solve iterations performed
    pub iterations: usize,

    /// False if the iteration cap was reached first
    pub converged: bool,
}

/// Fit an asymmetric baseline to `trace`
///
/// Equivalent to [`fit_baseline_masked`] with no excluded points.
pub fn fit_baseline(trace: &[f64], config: &BaselineConfig) -> Result<BaselineFit> {
    fit_baseline_masked(trace, &vec![false; trace.len()], config)
}

/// Fit an asymmetric baseline, ignoring points where `excluded` is true
///
/// # Algorithm
/// 1. Start with weight 1 for every included point and 0 for excluded points
/// 2. Solve `(W + λ·DᵀD) z = W y`
/// 3. Reweight included points: `p` above the baseline, `1 - p` on or below
/// 4. Stop once `‖z_k - z_{k-1}‖ / ‖z_{k-1}‖ < ε` or the iteration cap is hit
///
/// Excluded points keep weight zero, so the penalty interpolates the baseline
/// across them. Reaching the cap is not an error: the last estimate is returned
/// with `converged = false`.
///
/// # Errors
/// Returns `StatsError` if the mask length differs from the trace or the
/// weighted system is singular.
pub fn fit_baseline_masked(
    trace: &[f64],
    excluded: &[bool],
    config: &BaselineConfig,
) -> Result<BaselineFit> {
    let n = trace.len();
    if excluded.len() != n {
        return Err(UvProError::StatsError(format!(
            "exclusion mask has {} entries for a trace of {}",
            excluded.len(),
            n
        )));
    }

    if n < 3 {
        return Ok(BaselineFit {
            baseline: trace.to_vec(),
            iterations: 0,
            converged: true,
        });
    }

    // A second-difference penalty needs two anchors to pin down its null space
    let included = excluded.iter().filter(|&&e| !e).count();
    let excluded: Vec<bool> = if included < 2 {
        warn!(
            "Only {} of {} cycles left for the baseline fit, using all cycles",
            included, n
        );
        vec![false; n]
    } else {
        excluded.to_vec()
    };

    let penalty = second_difference_penalty(n);
    let mut weights: Vec<f64> = excluded
        .iter()
        .map(|&e| if e { 0.0 } else { 1.0 })
        .collect();

    let mut previous = solve_penalized(trace, &weights, config.lambda, &penalty)?;
    let mut iterations = 1;

    loop {
        if iterations >= config.max_iterations {
            warn!(
                "Baseline fit stopped at the iteration cap ({}) before converging",
                config.max_iterations
            );
            return Ok(BaselineFit {
                baseline: previous,
                iterations,
                converged: false,
            });
        }

        for i in 0..n {
            if !excluded[i] {
                weights[i] = if trace[i] > previous[i] {
                    config.asymmetry
                } else {
                    1.0 - config.asymmetry
                };
            }
        }

        let current = solve_penalized(trace, &weights, config.lambda, &penalty)?;
        iterations += 1;

        let change = relative_change(&previous, &current);
        previous = current;
        if change < config.tolerance {
            debug!(
                "Baseline converged after {} iterations (relative change {:.3e})",
                iterations, change
            );
            return Ok(BaselineFit {
                baseline: previous,
                iterations,
                converged: true,
            });
        }
    }
}

fn relative_change(previous: &[f64], current: &[f64]) -> f64 {
    let diff: f64 = previous
        .iter()
        .zip(current)
        .map(|(a, b)| (b - a).powi(2))
        .sum::<f64>()
        .sqrt();
    let norm: f64 = previous.iter().map(|a| a * a).sum::<f64>().sqrt();
    diff / norm.max(f64::EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spiky_trace() -> Vec<f64> {
        let mut trace: Vec<f64> = (0..60).map(|i| 1.0 + 0.01 * i as f64).collect();
        trace[20] = 8.0;
        trace[40] = 6.0;
        trace
    }

    #[test]
    fn test_short_trace_is_copied() {
        let fit = fit_baseline(&[1.0, 5.0], &BaselineConfig::default()).unwrap();
        assert_eq!(fit.baseline, vec![1.0, 5.0]);
        assert!(fit.converged);
    }

    #[test]
    fn test_baseline_follows_lower_envelope() {
        let trace = spiky_trace();
        let fit = fit_baseline(&trace, &BaselineConfig::default()).unwrap();

        assert_eq!(fit.baseline.len(), trace.len());
        // Spikes sit well above the baseline
        assert!(trace[20] - fit.baseline[20] > 3.0);
        assert!(trace[40] - fit.baseline[40] > 2.0);
        // Quiet stretches are tracked closely
        assert_relative_eq!(fit.baseline[5], trace[5], epsilon = 0.2);
    }

    #[test]
    fn test_iteration_cap_is_not_an_error() {
        let config = BaselineConfig {
            tolerance: 1e-300,
            max_iterations: 2,
            ..Default::default()
        };
        let fit = fit_baseline(&spiky_trace(), &config).unwrap();
        assert_eq!(fit.iterations, 2);
        assert!(!fit.converged);
        assert_eq!(fit.baseline.len(), 60);
    }

    #[test]
    fn test_single_iteration_cap() {
        let config = BaselineConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let fit = fit_baseline(&spiky_trace(), &config).unwrap();
        assert_eq!(fit.iterations, 1);
        assert!(!fit.converged);
    }

    #[test]
    fn test_excluded_points_do_not_pull_baseline() {
        let mut trace = vec![2.0; 30];
        trace[15] = -50.0;
        let mut excluded = vec![false; 30];
        excluded[15] = true;

        let fit = fit_baseline_masked(&trace, &excluded, &BaselineConfig::default()).unwrap();
        assert_relative_eq!(fit.baseline[15], 2.0, epsilon = 1e-6);

        let unmasked = fit_baseline(&trace, &BaselineConfig::default()).unwrap();
        assert!(unmasked.baseline[15] < 0.0);
    }

    #[test]
    fn test_mask_length_mismatch() {
        let result = fit_baseline_masked(&[1.0, 2.0, 3.0], &[false], &BaselineConfig::default());
        assert!(matches!(result, Err(UvProError::StatsError(_))));
    }

    #[test]
    fn test_config_validation() {
        assert!(BaselineConfig::default().validate().is_ok());
        let bad = [
            BaselineConfig { lambda: 0.0, ..Default::default() },
            BaselineConfig { tolerance: f64::NAN, ..Default::default() },
            BaselineConfig { asymmetry: 0.7, ..Default::default() },
            BaselineConfig { max_iterations: 0, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(UvProError::ConfigError(_))));
        }
    }
}
