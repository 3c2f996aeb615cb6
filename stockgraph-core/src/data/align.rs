//! Calendar alignment of a panel before numeric extraction.
//!
//! Securities can miss sessions (trading halts, late listings), so equal
//! series lengths do not imply equal calendars. The policy decides how that
//! is handled:
//! - `IntersectDates` keeps only the trading dates every security has.
//! - `Positional` keeps series as they are and rejects any panel whose
//!   calendars differ.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::variation::{common_length, ShapeMismatch};
use crate::domain::{Panel, PanelEntry, SecurityId};

/// Fewest common trading days a joined panel may have.
pub const MIN_COMMON_DAYS: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentPolicy {
    /// Series must already share length and dates, index by index.
    Positional,
    /// Inner-join on trading date.
    #[default]
    IntersectDates,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AlignmentError {
    #[error(transparent)]
    Shape(#[from] ShapeMismatch),

    #[error("{security}: day {index} is {actual}, but {reference} has {expected}")]
    CalendarMismatch {
        security: SecurityId,
        reference: SecurityId,
        index: usize,
        expected: NaiveDate,
        actual: NaiveDate,
    },

    #[error("only {common} common trading day(s) across the panel, need at least {required}")]
    InsufficientOverlap { common: usize, required: usize },
}

/// A panel whose series share one calendar.
#[derive(Debug, Clone)]
pub struct AlignedPanel {
    pub panel: Panel,
    pub dates: Vec<NaiveDate>,
}

pub fn align_panel(panel: &Panel, policy: AlignmentPolicy) -> Result<AlignedPanel, AlignmentError> {
    match policy {
        AlignmentPolicy::Positional => align_positional(panel),
        AlignmentPolicy::IntersectDates => align_intersect(panel),
    }
}

fn align_positional(panel: &Panel) -> Result<AlignedPanel, AlignmentError> {
    common_length(panel)?;
    let Some(reference) = panel.entries().first() else {
        return Ok(AlignedPanel {
            panel: panel.clone(),
            dates: Vec::new(),
        });
    };

    let dates = reference.series.dates();
    for entry in &panel.entries()[1..] {
        for (index, (bar, expected)) in entry.series.bars().iter().zip(&dates).enumerate() {
            if bar.trading_date != *expected {
                return Err(AlignmentError::CalendarMismatch {
                    security: entry.security.clone(),
                    reference: reference.security.clone(),
                    index,
                    expected: *expected,
                    actual: bar.trading_date,
                });
            }
        }
    }

    Ok(AlignedPanel {
        panel: panel.clone(),
        dates,
    })
}

fn align_intersect(panel: &Panel) -> Result<AlignedPanel, AlignmentError> {
    let mut entries = panel.entries().iter();
    let Some(first) = entries.next() else {
        return Ok(AlignedPanel {
            panel: panel.clone(),
            dates: Vec::new(),
        });
    };

    let mut common: BTreeSet<NaiveDate> = first.series.dates().into_iter().collect();
    for entry in entries {
        let dates: BTreeSet<NaiveDate> = entry.series.dates().into_iter().collect();
        common = common.intersection(&dates).copied().collect();
    }

    if common.len() < MIN_COMMON_DAYS {
        return Err(AlignmentError::InsufficientOverlap {
            common: common.len(),
            required: MIN_COMMON_DAYS,
        });
    }

    let joined: Vec<PanelEntry> = panel
        .entries()
        .iter()
        .map(|entry| {
            let series = entry.series.retain_dates(|d| common.contains(&d));
            let dropped = entry.series.len() - series.len();
            if dropped > 0 {
                tracing::info!(security = %entry.security, dropped, "dropped unshared trading days");
            }
            PanelEntry {
                security: entry.security.clone(),
                name: entry.name.clone(),
                series,
            }
        })
        .collect();

    Ok(AlignedPanel {
        panel: Panel::new(joined),
        dates: common.into_iter().collect(),
    })
}
