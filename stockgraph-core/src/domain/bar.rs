//! DailyBar and QuoteSeries — the per-security market data units.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::SecurityId;

/// One trading day's OHLCV for a single security.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub trading_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl DailyBar {
    /// Price variation over the session.
    pub fn variation(&self) -> f64 {
        self.close - self.open
    }

    /// All fields finite and non-negative.
    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("{security}: bar dated {date} does not follow {previous}")]
    NotIncreasing {
        security: SecurityId,
        previous: NaiveDate,
        date: NaiveDate,
    },

    #[error("{security}: bar dated {date} has a negative or non-finite field")]
    InvalidBar {
        security: SecurityId,
        date: NaiveDate,
    },
}

/// Chronological (oldest first) bars for one security.
///
/// Dates are strictly increasing; construction rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSeries {
    security: SecurityId,
    bars: Vec<DailyBar>,
}

impl QuoteSeries {
    pub fn new(security: SecurityId, bars: Vec<DailyBar>) -> Result<Self, SeriesError> {
        for bar in &bars {
            if !bar.is_valid() {
                return Err(SeriesError::InvalidBar {
                    security,
                    date: bar.trading_date,
                });
            }
        }
        for pair in bars.windows(2) {
            if pair[1].trading_date <= pair[0].trading_date {
                return Err(SeriesError::NotIncreasing {
                    security,
                    previous: pair[0].trading_date,
                    date: pair[1].trading_date,
                });
            }
        }
        Ok(Self { security, bars })
    }

    pub fn empty(security: SecurityId) -> Self {
        Self {
            security,
            bars: Vec::new(),
        }
    }

    pub fn security(&self) -> &SecurityId {
        &self.security
    }

    pub fn bars(&self) -> &[DailyBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.trading_date).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.trading_date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.trading_date)
    }

    /// Keep only bars whose date satisfies `keep`. Order is preserved, so the
    /// ordering invariant still holds.
    pub fn retain_dates(&self, mut keep: impl FnMut(NaiveDate) -> bool) -> Self {
        Self {
            security: self.security.clone(),
            bars: self
                .bars
                .iter()
                .filter(|b| keep(b.trading_date))
                .copied()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, open: f64, close: f64) -> DailyBar {
        DailyBar {
            trading_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open,
            high: open.max(close) + 1.0,
            low: open.min(close) - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn variation_is_close_minus_open() {
        assert_eq!(bar(2, 100.0, 103.5).variation(), 3.5);
        assert_eq!(bar(2, 100.0, 97.0).variation(), -3.0);
    }

    #[test]
    fn series_accepts_increasing_dates() {
        let s = QuoteSeries::new("A".into(), vec![bar(2, 1.0, 2.0), bar(3, 2.0, 3.0)]).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.first_date(), NaiveDate::from_ymd_opt(2024, 1, 2));
    }

    #[test]
    fn series_rejects_duplicate_dates() {
        let err = QuoteSeries::new("A".into(), vec![bar(2, 1.0, 2.0), bar(2, 2.0, 3.0)]);
        assert!(matches!(err, Err(SeriesError::NotIncreasing { .. })));
    }

    #[test]
    fn series_rejects_descending_dates() {
        let err = QuoteSeries::new("A".into(), vec![bar(3, 1.0, 2.0), bar(2, 2.0, 3.0)]);
        assert!(matches!(err, Err(SeriesError::NotIncreasing { .. })));
    }

    #[test]
    fn series_rejects_negative_volume() {
        let mut b = bar(2, 1.0, 2.0);
        b.volume = -1.0;
        let err = QuoteSeries::new("A".into(), vec![b]);
        assert!(matches!(err, Err(SeriesError::InvalidBar { .. })));
    }

    #[test]
    fn retain_dates_keeps_order() {
        let s = QuoteSeries::new(
            "A".into(),
            vec![bar(2, 1.0, 2.0), bar(3, 2.0, 3.0), bar(4, 3.0, 4.0)],
        )
        .unwrap();
        let kept = s.retain_dates(|d| d.format("%d").to_string() != "03");
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.last_date(), NaiveDate::from_ymd_opt(2024, 1, 4));
    }
}
