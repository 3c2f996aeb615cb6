//! Return-variation extraction: per-day `close - open` for every security.

use nalgebra::DMatrix;
use thiserror::Error;

use crate::domain::{Panel, SecurityId};

/// Series lengths differ across the panel.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{security} has {actual} trading days, expected {expected}")]
pub struct ShapeMismatch {
    pub security: SecurityId,
    pub expected: usize,
    pub actual: usize,
}

/// The shared series length of `panel`, or the first security that breaks it.
pub fn common_length(panel: &Panel) -> Result<usize, ShapeMismatch> {
    let Some(first) = panel.entries().first() else {
        return Ok(0);
    };
    let expected = first.series.len();
    for entry in panel.entries() {
        if entry.series.len() != expected {
            return Err(ShapeMismatch {
                security: entry.security.clone(),
                expected,
                actual: entry.series.len(),
            });
        }
    }
    Ok(expected)
}

/// `N x T` matrix with `variation[(i, t)] = close[i][t] - open[i][t]`.
///
/// Rows follow panel order. Alignment is positional: every series must have
/// the same length.
pub fn extract_variations(panel: &Panel) -> Result<DMatrix<f64>, ShapeMismatch> {
    let t = common_length(panel)?;
    let n = panel.len();
    let entries = panel.entries();
    Ok(DMatrix::from_fn(n, t, |i, j| {
        entries[i].series.bars()[j].variation()
    }))
}
