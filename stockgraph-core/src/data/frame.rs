//! Date-indexed per-security frames for chart rendering.

use chrono::NaiveDate;
use polars::prelude::*;

use crate::domain::{Panel, QuoteSeries, SecurityId};

/// Frame columns after `date`, in presentation order.
pub const FRAME_COLUMNS: [&str; 5] = ["close", "open", "high", "low", "volume"];

/// One security's bars as a frame sorted by `date`, with columns
/// `date, close, open, high, low, volume`.
pub fn series_frame(series: &QuoteSeries) -> PolarsResult<DataFrame> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    let bars = series.bars();

    let dates: Vec<i32> = bars
        .iter()
        .map(|b| (b.trading_date - epoch).num_days() as i32)
        .collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates).cast(&DataType::Date)?,
        Column::new("close".into(), closes),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("volume".into(), volumes),
    ])
}

/// Frames for every security of a panel, in panel order.
pub fn panel_frames(panel: &Panel) -> PolarsResult<Vec<(SecurityId, DataFrame)>> {
    panel
        .entries()
        .iter()
        .map(|e| Ok((e.security.clone(), series_frame(&e.series)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DailyBar;

    #[test]
    fn frame_has_presentation_columns() {
        let bars = (0..3)
            .map(|i| DailyBar {
                trading_date: NaiveDate::from_ymd_opt(2024, 2, 5 + i).unwrap(),
                open: 100.0 + i as f64,
                high: 102.0 + i as f64,
                low: 99.0 + i as f64,
                close: 101.0 + i as f64,
                volume: 1_000.0,
            })
            .collect();
        let series = QuoteSeries::new("005930".into(), bars).unwrap();
        let df = series_frame(&series).unwrap();

        assert_eq!(df.height(), 3);
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["date", "close", "open", "high", "low", "volume"]);
        assert_eq!(df.column("date").unwrap().dtype(), &DataType::Date);

        let closes: Vec<Option<f64>> = df.column("close").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(closes, vec![Some(101.0), Some(102.0), Some(103.0)]);
    }
}
