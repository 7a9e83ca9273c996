//! Whittaker smoother building blocks
//!
//! The smoother solves `(W + λ·DᵀD) z = W y`, where `D` is the second-order
//! difference matrix and `W` a diagonal weight matrix. `DᵀD` is symmetric and
//! pentadiagonal, so the system is factorised in O(n) with a banded LDLᵀ
//! decomposition instead of a dense solve.

use crate::error::{Result, UvProError};

/// Upper bands of a symmetric pentadiagonal matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Pentadiagonal {
    /// Main diagonal, `a[i][i]`
    pub diag: Vec<f64>,
    /// First super-diagonal, `a[i][i + 1]` (length n - 1)
    pub upper1: Vec<f64>,
    /// Second super-diagonal, `a[i][i + 2]` (length n - 2)
    pub upper2: Vec<f64>,
}

impl Pentadiagonal {
    #[must_use]
    pub fn len(&self) -> usize {
        self.diag.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }
}

/// `DᵀD` for the second-order difference operator on `n` points
///
/// For n ≥ 4 the bands are `[1, 5, 6, …, 6, 5, 1]`, `[-2, -4, …, -4, -2]`
/// and `[1, …, 1]`. Fewer than 3 points have no second differences, so the
/// penalty is zero.
#[must_use]
pub fn second_difference_penalty(n: usize) -> Pentadiagonal {
    const STENCIL: [f64; 3] = [1.0, -2.0, 1.0];

    let mut diag = vec![0.0; n];
    let mut upper1 = vec![0.0; n.saturating_sub(1)];
    let mut upper2 = vec![0.0; n.saturating_sub(2)];

    for k in 0..n.saturating_sub(2) {
        for a in 0..3 {
            for b in a..3 {
                let value = STENCIL[a] * STENCIL[b];
                match b - a {
                    0 => diag[k + a] += value,
                    1 => upper1[k + a] += value,
                    _ => upper2[k + a] += value,
                }
            }
        }
    }

    Pentadiagonal {
        diag,
        upper1,
        upper2,
    }
}

/// Solve `(W + λ·P) z = W y` for a pentadiagonal penalty `P`
///
/// # Errors
/// Returns `StatsError` if the inputs differ in length or the system is not
/// positive definite (e.g. fewer than two points carry weight).
pub fn solve_penalized(
    y: &[f64],
    weights: &[f64],
    lambda: f64,
    penalty: &Pentadiagonal,
) -> Result<Vec<f64>> {
    let n = y.len();
    if weights.len() != n || penalty.len() != n {
        return Err(UvProError::StatsError(format!(
            "Whittaker system size mismatch: {} values, {} weights, {} penalty rows",
            n,
            weights.len(),
            penalty.len()
        )));
    }

    let system = Pentadiagonal {
        diag: (0..n)
            .map(|i| weights[i] + lambda * penalty.diag[i])
            .collect(),
        upper1: penalty.upper1.iter().map(|v| lambda * v).collect(),
        upper2: penalty.upper2.iter().map(|v| lambda * v).collect(),
    };
    let rhs: Vec<f64> = y.iter().zip(weights).map(|(v, w)| v * w).collect();

    solve_ldlt(&system, &rhs)
}

/// Banded LDLᵀ solve of a symmetric positive-definite pentadiagonal system
fn solve_ldlt(a: &Pentadiagonal, b: &[f64]) -> Result<Vec<f64>> {
    let n = a.len();
    let mut d = vec![0.0; n];
    // l1[i] = L[i][i-1], l2[i] = L[i][i-2]
    let mut l1 = vec![0.0; n];
    let mut l2 = vec![0.0; n];

    for i in 0..n {
        if i >= 2 {
            l2[i] = a.upper2[i - 2] / d[i - 2];
        }
        if i >= 1 {
            let coupling = if i >= 2 { l2[i] * l1[i - 1] * d[i - 2] } else { 0.0 };
            l1[i] = (a.upper1[i - 1] - coupling) / d[i - 1];
        }
        let mut pivot = a.diag[i];
        if i >= 1 {
            pivot -= l1[i] * l1[i] * d[i - 1];
        }
        if i >= 2 {
            pivot -= l2[i] * l2[i] * d[i - 2];
        }
        if !(pivot.is_finite() && pivot > 0.0) {
            return Err(UvProError::StatsError(format!(
                "Whittaker system is not positive definite (pivot {pivot:e} at row {i})"
            )));
        }
        d[i] = pivot;
    }

    // Forward substitution: L u = b
    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut value = b[i];
        if i >= 1 {
            value -= l1[i] * x[i - 1];
        }
        if i >= 2 {
            value -= l2[i] * x[i - 2];
        }
        x[i] = value;
    }
    // Diagonal: D v = u
    for i in 0..n {
        x[i] /= d[i];
    }
    // Back substitution: Lᵀ z = v
    for i in (0..n).rev() {
        if i + 1 < n {
            x[i] -= l1[i + 1] * x[i + 1];
        }
        if i + 2 < n {
            x[i] -= l2[i + 2] * x[i + 2];
        }
    }

    Ok(x)
}
