//! Domain types: security ids, daily bars, quote series, and the panel.

pub mod bar;
pub mod ids;
pub mod panel;

pub use bar::{DailyBar, QuoteSeries, SeriesError};
pub use ids::SecurityId;
pub use panel::{Panel, PanelEntry};
