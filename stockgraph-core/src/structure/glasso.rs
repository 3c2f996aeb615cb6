//! Sparse inverse-covariance estimation by L1-penalized maximum likelihood,
//! with the penalty picked by contiguous k-fold cross-validation.
//!
//! The solver is block coordinate descent over the rows of the covariance
//! estimate: each row is a lasso problem on the Gram matrix of the others.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::{ClusteringFailure, ClusteringStep};

/// Scores at or above this are treated as a degenerate fit.
const DEGENERATE_SCORE: f64 = 0.1 / f64::EPSILON;

/// Tuning of the graphical lasso and its cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicalLassoConfig {
    /// Penalties tried per refinement round.
    pub n_alphas: usize,
    /// Rounds of grid refinement around the best penalty.
    pub n_refinements: usize,
    /// Number of contiguous cross-validation folds.
    pub folds: usize,
    /// Outer iterations before the fit is declared non-convergent.
    pub max_iter: usize,
    /// Dual-gap tolerance for the outer loop.
    pub tol: f64,
    pub enet_max_iter: usize,
    pub enet_tol: f64,
}

impl Default for GraphicalLassoConfig {
    fn default() -> Self {
        Self {
            n_alphas: 4,
            n_refinements: 4,
            folds: 5,
            max_iter: 100,
            tol: 1e-4,
            enet_max_iter: 1000,
            enet_tol: 1e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GlassoError {
    #[error("initial covariance estimate is singular")]
    Singular,

    #[error("precision became degenerate at iteration {iteration}")]
    Degenerate { iteration: usize },

    #[error("no convergence after {iterations} iterations (dual gap {gap:.3e})")]
    NotConverged { iterations: usize, gap: f64 },
}

/// A single penalized fit.
#[derive(Debug, Clone)]
pub struct GlassoFit {
    pub covariance: DMatrix<f64>,
    pub precision: DMatrix<f64>,
    pub iterations: usize,
}

/// The cross-validated estimate.
#[derive(Debug, Clone)]
pub struct SparseCovariance {
    pub covariance: DMatrix<f64>,
    pub precision: DMatrix<f64>,
    pub alpha: f64,
    /// Every `(alpha, mean held-out log-likelihood)` evaluated, alpha descending.
    pub cv_path: Vec<(f64, f64)>,
}

/// Maximum-likelihood covariance of the rows of `x`, centered, divided by `T`.
pub fn empirical_covariance(x: &DMatrix<f64>) -> DMatrix<f64> {
    let t = x.nrows().max(1);
    let mut centered = x.clone();
    for j in 0..x.ncols() {
        let mean = x.column(j).mean();
        centered.column_mut(j).add_scalar_mut(-mean);
    }
    (centered.transpose() * &centered) / t as f64
}

/// Gaussian log-likelihood of `emp_cov` under `precision`, per sample.
///
/// Returns negative infinity if `precision` is not positive definite.
pub fn log_likelihood(emp_cov: &DMatrix<f64>, precision: &DMatrix<f64>) -> f64 {
    let p = precision.nrows() as f64;
    let Some(chol) = precision.clone().cholesky() else {
        return f64::NEG_INFINITY;
    };
    let log_det = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
    let value = (-emp_cov.component_mul(precision).sum() + log_det - p * (2.0 * PI).ln()) / 2.0;
    if value.is_finite() {
        value
    } else {
        f64::NEG_INFINITY
    }
}

/// Fit the graphical lasso at a fixed penalty.
pub fn graphical_lasso(
    emp_cov: &DMatrix<f64>,
    alpha: f64,
    config: &GraphicalLassoConfig,
) -> Result<GlassoFit, GlassoError> {
    let p = emp_cov.nrows();

    if alpha == 0.0 {
        let precision = spd_inverse(emp_cov).ok_or(GlassoError::Singular)?;
        return Ok(GlassoFit {
            covariance: emp_cov.clone(),
            precision,
            iterations: 0,
        });
    }

    let mut covariance = emp_cov * 0.95;
    covariance.set_diagonal(&emp_cov.diagonal());
    let mut precision = spd_inverse(&covariance).ok_or(GlassoError::Singular)?;

    let mut gap = f64::INFINITY;
    for iteration in 1..=config.max_iter {
        for idx in 0..p {
            let others: Vec<usize> = (0..p).filter(|&k| k != idx).collect();
            let sub = covariance.select_rows(&others).select_columns(&others);
            let row = DVector::from_iterator(others.len(), others.iter().map(|&k| emp_cov[(idx, k)]));
            let denom = precision[(idx, idx)] + 1000.0 * f64::EPSILON;
            let warm = DVector::from_iterator(
                others.len(),
                others.iter().map(|&k| -precision[(k, idx)] / denom),
            );

            let coefs = lasso_gram(&sub, &row, alpha, warm, config.enet_max_iter, config.enet_tol);
            let w12 = &sub * &coefs;
            let theta = 1.0 / (covariance[(idx, idx)] - w12.dot(&coefs));
            if !(theta.is_finite() && theta > 0.0) {
                return Err(GlassoError::Degenerate { iteration });
            }

            precision[(idx, idx)] = theta;
            for (pos, &k) in others.iter().enumerate() {
                let off = -theta * coefs[pos];
                precision[(k, idx)] = off;
                precision[(idx, k)] = off;
                covariance[(k, idx)] = w12[pos];
                covariance[(idx, k)] = w12[pos];
            }
        }

        if precision.iter().any(|v| !v.is_finite()) {
            return Err(GlassoError::Degenerate { iteration });
        }
        gap = dual_gap(emp_cov, &precision, alpha);
        if !gap.is_finite() {
            return Err(GlassoError::Degenerate { iteration });
        }
        if gap.abs() < config.tol {
            return Ok(GlassoFit {
                covariance,
                precision,
                iterations: iteration,
            });
        }
    }

    Err(GlassoError::NotConverged {
        iterations: config.max_iter,
        gap,
    })
}

/// Cross-validate the penalty on the `T x N` matrix `x`, then refit on all rows.
///
/// If the final fit at the best penalty does not converge, the remaining
/// penalties are tried in order of their cross-validated score.
pub fn graphical_lasso_cv(
    x: &DMatrix<f64>,
    config: &GraphicalLassoConfig,
) -> Result<SparseCovariance, ClusteringFailure> {
    let (t, p) = x.shape();
    let emp_cov = empirical_covariance(x);

    let alpha_max = (0..p)
        .flat_map(|i| (0..p).filter(move |&j| j != i).map(move |j| (i, j)))
        .map(|(i, j)| emp_cov[(i, j)].abs())
        .fold(0.0f64, f64::max);

    if alpha_max == 0.0 {
        // Uncorrelated input: every penalty yields the diagonal solution.
        let precision = spd_inverse(&emp_cov).ok_or_else(|| {
            ClusteringFailure::new(ClusteringStep::StructureEstimation, "covariance is singular")
        })?;
        return Ok(SparseCovariance {
            covariance: emp_cov,
            precision,
            alpha: 0.0,
            cv_path: Vec::new(),
        });
    }

    let n_alphas = config.n_alphas.max(2);
    let folds: Vec<(DMatrix<f64>, DMatrix<f64>)> = fold_ranges(t, config.folds.clamp(2, t.max(2)))
        .into_iter()
        .map(|(start, end)| {
            let train: Vec<usize> = (0..t).filter(|r| *r < start || *r >= end).collect();
            let test: Vec<usize> = (start..end).collect();
            (
                empirical_covariance(&x.select_rows(&train)),
                empirical_covariance(&x.select_rows(&test)),
            )
        })
        .collect();

    let mut alphas = logspace(alpha_max, 0.01 * alpha_max, n_alphas);
    let mut path: Vec<(f64, f64)> = Vec::new();
    for round in 0..config.n_refinements.max(1) {
        for &alpha in &alphas {
            path.push((alpha, cv_score(&folds, alpha, config)));
        }
        path.sort_by(|a, b| b.0.total_cmp(&a.0));

        let (best, last_finite) = best_index(&path);
        debug!(
            round,
            alpha = path[best].0,
            score = path[best].1,
            "graphical lasso cross-validation round"
        );
        alphas = refine(&path, best, last_finite, n_alphas);
    }

    let (best, _) = best_index(&path);
    let mut order: Vec<usize> = (0..path.len()).filter(|&i| i != best).collect();
    order.sort_by(|&a, &b| path[b].1.total_cmp(&path[a].1));
    order.insert(0, best);

    let mut last_error = None;
    for idx in order {
        let alpha = path[idx].0;
        match graphical_lasso(&emp_cov, alpha, config) {
            Ok(fit) => {
                debug!(alpha, iterations = fit.iterations, "graphical lasso converged");
                return Ok(SparseCovariance {
                    covariance: fit.covariance,
                    precision: fit.precision,
                    alpha,
                    cv_path: path,
                });
            }
            Err(e) => {
                warn!(alpha, error = %e, "graphical lasso refit failed, trying next penalty");
                last_error = Some(e);
            }
        }
    }

    Err(ClusteringFailure::new(
        ClusteringStep::StructureEstimation,
        match last_error {
            Some(e) => format!("graphical lasso failed at every penalty: {e}"),
            None => "no penalty evaluated".to_string(),
        },
    ))
}

fn cv_score(folds: &[(DMatrix<f64>, DMatrix<f64>)], alpha: f64, config: &GraphicalLassoConfig) -> f64 {
    let total: f64 = folds
        .iter()
        .map(|(train, test)| match graphical_lasso(train, alpha, config) {
            Ok(fit) => log_likelihood(test, &fit.precision),
            Err(_) => f64::NEG_INFINITY,
        })
        .sum();
    let mean = total / folds.len() as f64;
    if mean.is_nan() {
        f64::NEG_INFINITY
    } else {
        mean
    }
}

/// Index of the best score (ties go to the smaller penalty) and of the last
/// finite score.
fn best_index(path: &[(f64, f64)]) -> (usize, usize) {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    let mut last_finite = 0;
    for (i, &(_, score)) in path.iter().enumerate() {
        let score = if score >= DEGENERATE_SCORE { f64::NAN } else { score };
        if score.is_finite() {
            last_finite = i;
        }
        if score >= best_score {
            best_score = score;
            best = i;
        }
    }
    (best, last_finite)
}

fn refine(path: &[(f64, f64)], best: usize, last_finite: usize, n_alphas: usize) -> Vec<f64> {
    let last = path.len() - 1;
    let (high, low) = if best == 0 {
        (path[0].0, path[1].0)
    } else if best == last_finite && best != last {
        (path[best].0, path[best + 1].0)
    } else if best == last {
        (path[best].0, 0.01 * path[best].0)
    } else {
        (path[best - 1].0, path[best + 1].0)
    };
    let grid = logspace(high, low, n_alphas + 2);
    grid[1..grid.len() - 1].to_vec()
}

/// `n >= 2` points geometrically spaced from `high` down to `low`.
fn logspace(high: f64, low: f64, n: usize) -> Vec<f64> {
    let (a, b) = (high.ln(), low.ln());
    (0..n)
        .map(|i| (a + (b - a) * i as f64 / (n - 1) as f64).exp())
        .collect()
}

/// Contiguous `[start, end)` folds; the first `t % k` folds get one extra row.
fn fold_ranges(t: usize, k: usize) -> Vec<(usize, usize)> {
    let (base, extra) = (t / k, t % k);
    let mut start = 0;
    (0..k)
        .map(|i| {
            let end = start + base + usize::from(i < extra);
            let range = (start, end);
            start = end;
            range
        })
        .collect()
}

fn dual_gap(emp_cov: &DMatrix<f64>, precision: &DMatrix<f64>, alpha: f64) -> f64 {
    let p = precision.nrows() as f64;
    let total_abs: f64 = precision.iter().map(|v| v.abs()).sum();
    let diag_abs: f64 = precision.diagonal().iter().map(|v| v.abs()).sum();
    emp_cov.component_mul(precision).sum() - p + alpha * (total_abs - diag_abs)
}

/// Coordinate descent for `min_b 0.5 b'Vb - u'b + alpha |b|_1`.
fn lasso_gram(
    v: &DMatrix<f64>,
    u: &DVector<f64>,
    alpha: f64,
    mut b: DVector<f64>,
    max_iter: usize,
    tol: f64,
) -> DVector<f64> {
    let m = u.len();
    for _ in 0..max_iter {
        let mut max_delta = 0.0f64;
        let mut max_b = 0.0f64;
        for j in 0..m {
            let vjj = v[(j, j)];
            let old = b[j];
            let mut partial = u[j];
            for k in (0..m).filter(|&k| k != j) {
                partial -= v[(j, k)] * b[k];
            }
            let new = if vjj > 0.0 {
                soft_threshold(partial, alpha) / vjj
            } else {
                0.0
            };
            b[j] = new;
            max_delta = max_delta.max((new - old).abs());
            max_b = max_b.max(new.abs());
        }
        if max_b == 0.0 || max_delta <= tol * max_b {
            break;
        }
    }
    b
}

fn soft_threshold(x: f64, alpha: f64) -> f64 {
    x.signum() * (x.abs() - alpha).max(0.0)
}

fn spd_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    match m.clone().cholesky() {
        Some(chol) => Some(chol.inverse()),
        None => m.clone().try_inverse(),
    }
}
