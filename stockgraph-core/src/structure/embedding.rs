//! Locally linear embedding into the plane.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ClusteringFailure, ClusteringStep};

const EIGEN_MAX_ITER: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub n_neighbors: usize,
    pub n_components: usize,
    /// Regularization of the local Gram matrix, relative to its trace.
    pub reg: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 6,
            n_components: 2,
            reg: 1e-3,
        }
    }
}

/// Embed the rows of `points` (`N x D`) into `n_components` dimensions.
///
/// Returns an `n_components x N` matrix. Each output row has its largest
/// magnitude entry positive, so results are stable across eigen solvers.
pub fn locally_linear_embedding(
    points: &DMatrix<f64>,
    config: &EmbeddingConfig,
) -> Result<DMatrix<f64>, ClusteringFailure> {
    let fail = |reason: String| ClusteringFailure::new(ClusteringStep::Embedding, reason);
    let n = points.nrows();
    let d = config.n_components;

    if d == 0 {
        return Err(fail("n_components must be positive".into()));
    }
    if n <= d {
        return Err(fail(format!(
            "embedding into {d} dimensions needs more than {d} securities, got {n}"
        )));
    }
    let k = config.n_neighbors.min(n - 1);
    if k == 0 {
        return Err(fail("n_neighbors must be positive".into()));
    }
    if k < config.n_neighbors {
        warn!(
            requested = config.n_neighbors,
            used = k,
            "fewer securities than neighbors, shrinking neighborhood"
        );
    }

    let weights = barycenter_weights(points, k, config.reg).ok_or_else(|| {
        fail("local Gram matrix could not be solved".into())
    })?;

    let i_minus_w = DMatrix::<f64>::identity(n, n) - weights;
    let m = i_minus_w.transpose() * &i_minus_w;
    let eigen = SymmetricEigen::try_new(m, f64::EPSILON, EIGEN_MAX_ITER)
        .ok_or_else(|| fail("eigendecomposition did not converge".into()))?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[a]
            .total_cmp(&eigen.eigenvalues[b])
            .then(a.cmp(&b))
    });

    // Skip the constant eigenvector at eigenvalue zero.
    let mut embedding = DMatrix::<f64>::zeros(d, n);
    for (row, &col) in order[1..=d].iter().enumerate() {
        let v = eigen.eigenvectors.column(col);
        let peak = v.iter().copied().fold(0.0f64, |m, x| if x.abs() > m.abs() { x } else { m });
        let sign = if peak < 0.0 { -1.0 } else { 1.0 };
        for j in 0..n {
            embedding[(row, j)] = sign * v[j];
        }
    }

    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(fail("embedding has non-finite coordinates".into()));
    }
    Ok(embedding)
}

/// Indices of the `k` nearest other rows, nearest first, ties by index.
pub fn nearest_neighbors(points: &DMatrix<f64>, k: usize) -> Vec<Vec<usize>> {
    let n = points.nrows();
    (0..n)
        .map(|i| {
            let mut others: Vec<(f64, usize)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| ((points.row(i) - points.row(j)).norm_squared(), j))
                .collect();
            others.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            others.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect()
}

/// Row-stochastic reconstruction weights of each point from its neighbors.
fn barycenter_weights(points: &DMatrix<f64>, k: usize, reg: f64) -> Option<DMatrix<f64>> {
    let n = points.nrows();
    let mut weights = DMatrix::<f64>::zeros(n, n);

    for (i, neighbors) in nearest_neighbors(points, k).into_iter().enumerate() {
        let z = DMatrix::from_fn(neighbors.len(), points.ncols(), |a, c| {
            points[(neighbors[a], c)] - points[(i, c)]
        });
        let mut gram = &z * z.transpose();
        let trace = gram.trace();
        let r = if trace > 0.0 { reg * trace } else { reg };
        for a in 0..neighbors.len() {
            gram[(a, a)] += r;
        }

        let ones = DVector::<f64>::from_element(neighbors.len(), 1.0);
        let w = match gram.clone().cholesky() {
            Some(chol) => chol.solve(&ones),
            None => gram.lu().solve(&ones)?,
        };
        let total = w.sum();
        if !total.is_finite() || total == 0.0 {
            return None;
        }
        for (a, &j) in neighbors.iter().enumerate() {
            weights[(i, j)] = w[a] / total;
        }
    }

    Some(weights)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, 3, |i, c| {
            let t = i as f64 / n as f64 * 3.0;
            match c {
                0 => t.cos(),
                1 => t.sin(),
                _ => 0.3 * t,
            }
        })
    }

    #[test]
    fn output_is_components_by_points() {
        let e = locally_linear_embedding(&curve(12), &EmbeddingConfig::default()).unwrap();
        assert_eq!(e.shape(), (2, 12));
    }

    #[test]
    fn deterministic_for_identical_input() {
        let points = curve(10);
        let a = locally_linear_embedding(&points, &EmbeddingConfig::default()).unwrap();
        let b = locally_linear_embedding(&points, &EmbeddingConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn largest_entry_of_each_row_is_positive() {
        let e = locally_linear_embedding(&curve(9), &EmbeddingConfig::default()).unwrap();
        for row in 0..2 {
            let peak = e.row(row).iter().copied().fold(0.0f64, |m, x| if x.abs() > m.abs() { x } else { m });
            assert!(peak > 0.0);
        }
    }

    #[test]
    fn neighborhood_shrinks_for_small_inputs() {
        let e = locally_linear_embedding(&curve(3), &EmbeddingConfig::default()).unwrap();
        assert_eq!(e.shape(), (2, 3));
    }

    #[test]
    fn too_few_points_fail() {
        let err = locally_linear_embedding(&curve(2), &EmbeddingConfig::default()).unwrap_err();
        assert_eq!(err.step, ClusteringStep::Embedding);
    }

    #[test]
    fn weights_sum_to_one() {
        let w = barycenter_weights(&curve(8), 3, 1e-3).unwrap();
        for i in 0..8 {
            assert!((w.row(i).sum() - 1.0).abs() < 1e-10);
            assert_eq!(w[(i, i)], 0.0);
        }
    }

    #[test]
    fn neighbors_break_ties_by_index() {
        let points = DMatrix::from_row_slice(4, 1, &[0.0, 1.0, -1.0, 5.0]);
        assert_eq!(nearest_neighbors(&points, 2)[0], vec![1, 2]);
    }
}
