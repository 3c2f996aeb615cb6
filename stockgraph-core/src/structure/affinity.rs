//! Affinity propagation: exemplar-based clustering by message passing over a
//! similarity matrix.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ClusteringFailure, ClusteringStep};

/// How the self-similarity of every point is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Preference {
    /// Median of all similarities, diagonal included.
    Median,
    /// Smallest similarity; tends toward fewer clusters.
    Minimum,
    Fixed { value: f64 },
}

impl Preference {
    pub fn resolve(&self, similarity: &DMatrix<f64>) -> f64 {
        match *self {
            Preference::Median => median(similarity.iter().copied().collect()),
            Preference::Minimum => similarity.iter().copied().fold(f64::INFINITY, f64::min),
            Preference::Fixed { value } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    pub damping: f64,
    pub max_iter: usize,
    /// Iterations the exemplar set must stay unchanged to count as converged.
    pub convergence_iter: usize,
    /// Seed for the tie-breaking jitter added to the similarities.
    pub seed: u64,
    pub preference: Preference,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            damping: 0.5,
            max_iter: 200,
            convergence_iter: 15,
            seed: 0,
            preference: Preference::Median,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clusters {
    /// Cluster of each point; contiguous from 0.
    pub labels: Vec<usize>,
    /// Exemplar point of each cluster, indexed by label.
    pub exemplars: Vec<usize>,
    pub iterations: usize,
}

pub fn affinity_propagation(
    similarity: &DMatrix<f64>,
    preference: f64,
    config: &AffinityConfig,
) -> Result<Clusters, ClusteringFailure> {
    let fail = |reason: String| ClusteringFailure::new(ClusteringStep::AffinityPropagation, reason);
    let n = similarity.nrows();

    if n == 0 || similarity.ncols() != n {
        return Err(fail(format!(
            "similarity matrix must be square and non-empty, got {}x{}",
            n,
            similarity.ncols()
        )));
    }
    if !(0.5..1.0).contains(&config.damping) {
        return Err(fail(format!("damping {} outside [0.5, 1)", config.damping)));
    }
    if config.convergence_iter == 0 {
        return Err(fail("convergence_iter must be positive".into()));
    }
    if !preference.is_finite() || similarity.iter().any(|v| !v.is_finite()) {
        return Err(fail("similarities and preference must be finite".into()));
    }

    if n == 1 {
        return Ok(Clusters {
            labels: vec![0],
            exemplars: vec![0],
            iterations: 0,
        });
    }
    if let Some(off) = uniform_off_diagonal(similarity) {
        // No message passing can break the symmetry; decide directly.
        return Ok(if preference > off {
            Clusters {
                labels: (0..n).collect(),
                exemplars: (0..n).collect(),
                iterations: 0,
            }
        } else {
            Clusters {
                labels: vec![0; n],
                exemplars: vec![0],
                iterations: 0,
            }
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut s = similarity.clone();
    s.fill_diagonal(preference);
    let tiny = f64::MIN_POSITIVE * 100.0;
    for v in s.iter_mut() {
        let jitter: f64 = rng.gen_range(-0.5..0.5);
        *v += (f64::EPSILON * *v + tiny) * jitter;
    }

    let damping = config.damping;
    let mut r = DMatrix::<f64>::zeros(n, n);
    let mut a = DMatrix::<f64>::zeros(n, n);
    let mut history = vec![vec![false; config.convergence_iter]; n];
    let mut converged = false;
    let mut iterations = 0;

    for it in 0..config.max_iter {
        iterations = it + 1;

        for i in 0..n {
            let (mut first_k, mut first, mut second) = (0, f64::NEG_INFINITY, f64::NEG_INFINITY);
            for k in 0..n {
                let v = a[(i, k)] + s[(i, k)];
                if v > first {
                    second = first;
                    first = v;
                    first_k = k;
                } else if v > second {
                    second = v;
                }
            }
            for k in 0..n {
                let competing = if k == first_k { second } else { first };
                r[(i, k)] = damping * r[(i, k)] + (1.0 - damping) * (s[(i, k)] - competing);
            }
        }

        for k in 0..n {
            let support: f64 = (0..n).filter(|&i| i != k).map(|i| r[(i, k)].max(0.0)).sum();
            for i in 0..n {
                let new = if i == k {
                    support
                } else {
                    (r[(k, k)] + support - r[(i, k)].max(0.0)).min(0.0)
                };
                a[(i, k)] = damping * a[(i, k)] + (1.0 - damping) * new;
            }
        }

        let slot = it % config.convergence_iter;
        let mut count = 0;
        for k in 0..n {
            let is_exemplar = a[(k, k)] + r[(k, k)] > 0.0;
            history[k][slot] = is_exemplar;
            count += usize::from(is_exemplar);
        }
        if it >= config.convergence_iter {
            let stable = history
                .iter()
                .all(|h| h.iter().all(|&e| e) || h.iter().all(|&e| !e));
            if stable && count > 0 {
                converged = true;
                break;
            }
        }
    }

    if !converged {
        return Err(fail(format!(
            "did not converge within {} iterations",
            config.max_iter
        )));
    }

    let mut exemplars: Vec<usize> = (0..n).filter(|&k| a[(k, k)] + r[(k, k)] > 0.0).collect();
    if exemplars.is_empty() {
        return Err(fail("no exemplars emerged".into()));
    }

    let assign = |exemplars: &[usize]| -> Vec<usize> {
        let mut c: Vec<usize> = (0..n)
            .map(|i| argmax((0..exemplars.len()).map(|j| s[(i, exemplars[j])])))
            .collect();
        for (j, &e) in exemplars.iter().enumerate() {
            c[e] = j;
        }
        c
    };

    // Move each exemplar to the member with the highest total similarity.
    let c = assign(&exemplars);
    for (j, exemplar) in exemplars.iter_mut().enumerate() {
        let members: Vec<usize> = (0..n).filter(|&i| c[i] == j).collect();
        let best = argmax(
            members
                .iter()
                .map(|&m| members.iter().map(|&i| s[(i, m)]).sum::<f64>()),
        );
        *exemplar = members[best];
    }
    let c = assign(&exemplars);

    // Labels follow exemplar index order.
    let mut order: Vec<usize> = exemplars.clone();
    order.sort_unstable();
    order.dedup();
    let labels: Vec<usize> = c
        .iter()
        .map(|&j| order.iter().position(|&e| e == exemplars[j]).unwrap_or(0))
        .collect();

    debug!(iterations, clusters = order.len(), "affinity propagation converged");
    Ok(Clusters {
        labels,
        exemplars: order,
        iterations,
    })
}

fn uniform_off_diagonal(s: &DMatrix<f64>) -> Option<f64> {
    let n = s.nrows();
    let first = s[(0, 1)];
    let uniform = (0..n).all(|i| (0..n).all(|k| i == k || s[(i, k)] == first));
    uniform.then_some(first)
}

fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best_value {
            best_value = v;
            best = i;
        }
    }
    best
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => values[n / 2],
        _ => (values[n / 2 - 1] + values[n / 2]) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Negative squared distances between points on a line.
    fn line_similarity(points: &[f64]) -> DMatrix<f64> {
        let n = points.len();
        DMatrix::from_fn(n, n, |i, k| -(points[i] - points[k]).powi(2))
    }

    #[test]
    fn separates_two_tight_groups() {
        let s = line_similarity(&[0.0, 0.1, 0.2, 10.0, 10.1, 10.2]);
        let clusters = affinity_propagation(&s, -1.0, &AffinityConfig::default()).unwrap();
        let l = &clusters.labels;
        assert_eq!(l[0], l[1]);
        assert_eq!(l[1], l[2]);
        assert_eq!(l[3], l[4]);
        assert_eq!(l[4], l[5]);
        assert_ne!(l[0], l[3]);
        assert_eq!(clusters.exemplars.len(), 2);
    }

    #[test]
    fn labels_are_contiguous_and_exemplars_label_themselves() {
        let s = line_similarity(&[0.0, 0.5, 5.0, 5.5, 20.0, 20.5, 40.0]);
        let preference = Preference::Median.resolve(&s);
        let clusters = affinity_propagation(&s, preference, &AffinityConfig::default()).unwrap();
        let max = *clusters.labels.iter().max().unwrap();
        for label in 0..=max {
            assert!(clusters.labels.contains(&label));
        }
        for (label, &e) in clusters.exemplars.iter().enumerate() {
            assert_eq!(clusters.labels[e], label);
        }
    }

    #[test]
    fn single_point_is_its_own_cluster() {
        let s = DMatrix::from_element(1, 1, 1.0);
        let clusters = affinity_propagation(&s, 0.0, &AffinityConfig::default()).unwrap();
        assert_eq!(clusters.labels, vec![0]);
    }

    #[test]
    fn uniform_similarities_are_decided_by_preference() {
        let s = DMatrix::from_fn(3, 3, |i, k| if i == k { 1.0 } else { 0.5 });
        let split = affinity_propagation(&s, 0.9, &AffinityConfig::default()).unwrap();
        assert_eq!(split.labels, vec![0, 1, 2]);
        let merged = affinity_propagation(&s, 0.1, &AffinityConfig::default()).unwrap();
        assert_eq!(merged.labels, vec![0, 0, 0]);
    }

    #[test]
    fn same_seed_same_labels() {
        let s = line_similarity(&[0.0, 1.0, 2.0, 7.0, 8.0, 15.0, 16.0]);
        let config = AffinityConfig::default();
        let first = affinity_propagation(&s, -4.0, &config).unwrap();
        let second = affinity_propagation(&s, -4.0, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn damping_out_of_range_is_rejected() {
        let s = line_similarity(&[0.0, 1.0, 5.0]);
        let config = AffinityConfig {
            damping: 1.0,
            ..AffinityConfig::default()
        };
        let err = affinity_propagation(&s, -1.0, &config).unwrap_err();
        assert_eq!(err.step, ClusteringStep::AffinityPropagation);
    }

    #[test]
    fn median_preference_includes_diagonal() {
        let s = DMatrix::from_row_slice(2, 2, &[1.0, 0.2, 0.2, 1.0]);
        assert!((Preference::Median.resolve(&s) - 0.6).abs() < 1e-12);
        assert_eq!(Preference::Minimum.resolve(&s), 0.2);
    }
}
