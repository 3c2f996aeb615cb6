//! Structural clustering of securities from their daily variations.
//!
//! The pipeline is: standardize, estimate a sparse covariance with
//! cross-validated graphical lasso, cluster the covariance with affinity
//! propagation, embed the standardized series in the plane.

pub mod affinity;
pub mod embedding;
pub mod glasso;
pub mod standardize;

use std::fmt;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use affinity::{affinity_propagation, AffinityConfig, Clusters, Preference};
pub use embedding::{locally_linear_embedding, EmbeddingConfig};
pub use glasso::{graphical_lasso, graphical_lasso_cv, GlassoError, GraphicalLassoConfig, SparseCovariance};
pub use standardize::standardize;

/// Partial correlations at or below this magnitude are not drawn as edges.
pub const DEFAULT_EDGE_THRESHOLD: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusteringStep {
    Standardization,
    StructureEstimation,
    AffinityPropagation,
    Embedding,
}

impl fmt::Display for ClusteringStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusteringStep::Standardization => "standardization",
            ClusteringStep::StructureEstimation => "structure estimation",
            ClusteringStep::AffinityPropagation => "affinity propagation",
            ClusteringStep::Embedding => "embedding",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("clustering failed during {step}: {reason}")]
pub struct ClusteringFailure {
    pub step: ClusteringStep,
    pub reason: String,
}

impl ClusteringFailure {
    pub fn new(step: ClusteringStep, reason: impl Into<String>) -> Self {
        Self {
            step,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    pub graphical_lasso: GraphicalLassoConfig,
    pub affinity: AffinityConfig,
    pub embedding: EmbeddingConfig,
}

/// A partial-correlation link between two securities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub strength: f64,
}

/// Everything the clustering run learned about the securities.
#[derive(Debug, Clone)]
pub struct StructureModel {
    pub names: Vec<String>,
    /// Sparse covariance estimate, `N x N`.
    pub covariance: DMatrix<f64>,
    /// Its inverse, `N x N`.
    pub precision: DMatrix<f64>,
    /// Penalty chosen by cross-validation.
    pub alpha: f64,
    /// Cluster of each security, contiguous from 0.
    pub labels: Vec<usize>,
    /// Largest label.
    pub n_labels: usize,
    /// Planar coordinates, `2 x N`.
    pub embedding: DMatrix<f64>,
}

impl StructureModel {
    pub fn cluster_count(&self) -> usize {
        self.n_labels + 1
    }

    /// Member names of each cluster, by label.
    pub fn clusters(&self) -> Vec<Vec<&str>> {
        let mut groups = vec![Vec::new(); self.cluster_count()];
        for (name, &label) in self.names.iter().zip(&self.labels) {
            groups[label].push(name.as_str());
        }
        groups
    }

    /// Precision rescaled to unit diagonal: `P_ij / sqrt(P_ii P_jj)`.
    pub fn partial_correlations(&self) -> DMatrix<f64> {
        let d = self.node_sizes();
        let n = d.len();
        DMatrix::from_fn(n, n, |i, j| self.precision[(i, j)] * d[i] * d[j])
    }

    /// `1 / sqrt(P_ii)` per security.
    pub fn node_sizes(&self) -> Vec<f64> {
        self.precision.diagonal().iter().map(|p| 1.0 / p.sqrt()).collect()
    }

    /// Upper-triangle partial correlations with magnitude above `threshold`.
    pub fn edges(&self, threshold: f64) -> Vec<Edge> {
        let pc = self.partial_correlations();
        let n = pc.nrows();
        let mut out = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                if pc[(i, j)].abs() > threshold {
                    out.push(Edge {
                        source: i,
                        target: j,
                        strength: pc[(i, j)],
                    });
                }
            }
        }
        out
    }
}

/// Cluster securities from their `N x T` variation matrix.
///
/// Securities with identical standardized series are clustered as one and
/// share a label.
pub fn cluster(
    variations: &DMatrix<f64>,
    names: &[String],
    config: &StructureConfig,
) -> Result<StructureModel, ClusteringFailure> {
    let x = standardize(variations, names)?;
    let estimate = graphical_lasso_cv(&x, &config.graphical_lasso)?;

    let preference = config.affinity.preference.resolve(&estimate.covariance);
    let groups = duplicate_groups(&x);
    let mut representatives: Vec<usize> = groups.clone();
    representatives.sort_unstable();
    representatives.dedup();

    let reduced = estimate
        .covariance
        .select_rows(&representatives)
        .select_columns(&representatives);
    let clusters = affinity_propagation(&reduced, preference, &config.affinity)?;

    let labels: Vec<usize> = groups
        .iter()
        .map(|g| {
            representatives
                .iter()
                .position(|r| r == g)
                .map_or(0, |pos| clusters.labels[pos])
        })
        .collect();
    let n_labels = labels.iter().copied().max().unwrap_or(0);

    let embedding = locally_linear_embedding(&x.transpose(), &config.embedding)?;

    let model = StructureModel {
        names: names.to_vec(),
        covariance: estimate.covariance,
        precision: estimate.precision,
        alpha: estimate.alpha,
        labels,
        n_labels,
        embedding,
    };
    for (label, members) in model.clusters().iter().enumerate() {
        info!("Cluster {}: {}", label + 1, members.join(", "));
    }
    Ok(model)
}

/// For each column, the first column with an identical series.
fn duplicate_groups(x: &DMatrix<f64>) -> Vec<usize> {
    let n = x.ncols();
    let mut groups = Vec::with_capacity(n);
    for j in 0..n {
        let first = (0..j)
            .find(|&i| groups[i] == i && x.column(i) == x.column(j))
            .unwrap_or(j);
        groups.push(first);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_precision(precision: DMatrix<f64>) -> StructureModel {
        let n = precision.nrows();
        StructureModel {
            names: (0..n).map(|i| format!("s{i}")).collect(),
            covariance: DMatrix::identity(n, n),
            precision,
            alpha: 0.1,
            labels: vec![0; n],
            n_labels: 0,
            embedding: DMatrix::zeros(2, n),
        }
    }

    #[test]
    fn partial_correlations_have_unit_diagonal() {
        let p = DMatrix::from_row_slice(2, 2, &[4.0, -1.0, -1.0, 1.0]);
        let pc = model_with_precision(p).partial_correlations();
        assert!((pc[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((pc[(0, 1)] + 0.5).abs() < 1e-12);
    }

    #[test]
    fn edges_use_strict_threshold_on_upper_triangle() {
        let p = DMatrix::from_row_slice(3, 3, &[1.0, 0.5, 0.02, 0.5, 1.0, 0.0, 0.02, 0.0, 1.0]);
        let edges = model_with_precision(p).edges(DEFAULT_EDGE_THRESHOLD);
        assert_eq!(
            edges,
            vec![Edge {
                source: 0,
                target: 1,
                strength: 0.5
            }]
        );
    }

    #[test]
    fn clusters_group_names_by_label() {
        let mut model = model_with_precision(DMatrix::identity(3, 3));
        model.labels = vec![1, 0, 1];
        model.n_labels = 1;
        assert_eq!(model.clusters(), vec![vec!["s1"], vec!["s0", "s2"]]);
    }

    #[test]
    fn identical_columns_share_a_group() {
        let x = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 2.0, 3.0, 3.0, 4.0]);
        assert_eq!(duplicate_groups(&x), vec![0, 0, 2]);
    }

    #[test]
    fn failure_message_names_step() {
        let err = ClusteringFailure::new(ClusteringStep::Embedding, "boom");
        assert_eq!(err.to_string(), "clustering failed during embedding: boom");
    }
}
