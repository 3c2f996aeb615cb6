//! Per-security scaling of variations to unit variance.

use nalgebra::DMatrix;

use super::{ClusteringFailure, ClusteringStep};

/// Standard deviations at or below this fraction of a column's largest
/// magnitude count as zero.
const ZERO_VARIANCE_RATIO: f64 = 1e-12;

/// Transpose an `N x T` variation matrix to `T x N` and divide each column by
/// its population standard deviation over time.
///
/// Columns are scaled, not centered; the covariance estimator centers.
pub fn standardize(
    variations: &DMatrix<f64>,
    names: &[String],
) -> Result<DMatrix<f64>, ClusteringFailure> {
    let fail = |reason: String| ClusteringFailure::new(ClusteringStep::Standardization, reason);
    let (n, t) = variations.shape();

    if n == 0 {
        return Err(fail("no securities to cluster".into()));
    }
    if names.len() != n {
        return Err(fail(format!(
            "{} names for {n} securities",
            names.len()
        )));
    }
    if t < 2 {
        return Err(fail(format!("need at least 2 trading days, got {t}")));
    }
    if let Some(i) = (0..n).find(|&i| variations.row(i).iter().any(|v| !v.is_finite())) {
        return Err(fail(format!("{} has non-finite variations", names[i])));
    }

    let mut x = variations.transpose();
    for j in 0..n {
        let mut column = x.column_mut(j);
        let mean = column.mean();
        let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / t as f64;
        let std = var.sqrt();
        let scale = column.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        if std == 0.0 || std <= ZERO_VARIANCE_RATIO * scale {
            return Err(fail(format!(
                "{} has zero variance over {t} trading days",
                names[j]
            )));
        }
        column /= std;
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{i}")).collect()
    }

    #[test]
    fn columns_get_unit_population_variance() {
        let v = DMatrix::from_row_slice(2, 4, &[1.0, -1.0, 2.0, -2.0, 10.0, 0.0, 5.0, 1.0]);
        let x = standardize(&v, &names(2)).unwrap();
        assert_eq!(x.shape(), (4, 2));
        for j in 0..2 {
            let col = x.column(j);
            let mean = col.mean();
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
            assert!((var - 1.0).abs() < 1e-12, "column {j} variance {var}");
        }
    }

    #[test]
    fn scaling_is_not_centering() {
        let v = DMatrix::from_row_slice(1, 2, &[3.0, 5.0]);
        let x = standardize(&v, &names(1)).unwrap();
        // std = 1 so values are unchanged
        assert_eq!(x[(0, 0)], 3.0);
        assert_eq!(x[(1, 0)], 5.0);
    }

    #[test]
    fn zero_variance_names_the_security() {
        let v = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 4.0, 4.0]);
        let err = standardize(&v, &["moving".into(), "flat".into()]).unwrap_err();
        assert_eq!(err.step, ClusteringStep::Standardization);
        assert!(err.reason.contains("flat"), "{}", err.reason);
    }

    #[test]
    fn single_day_is_insufficient() {
        let v = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        assert!(standardize(&v, &names(2)).is_err());
    }

    #[test]
    fn name_count_must_match() {
        let v = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 3.0, 1.0, 2.0]);
        assert!(standardize(&v, &names(3)).is_err());
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let v = DMatrix::from_row_slice(1, 3, &[1.0, f64::NAN, 3.0]);
        assert!(standardize(&v, &names(1)).is_err());
    }
}
