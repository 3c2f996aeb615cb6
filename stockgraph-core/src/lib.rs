//! StockGraph Core — quote acquisition, panel assembly, and correlation-structure
//! clustering of equities.
//!
//! - Domain types (security ids, daily bars, quote series, panels)
//! - Quote sources: the paginated daily listing adapter with retry policy
//! - Panel assembly over a universe, calendar alignment, variation extraction
//! - Structural clustering: sparse covariance, affinity propagation, embedding

pub mod data;
pub mod domain;
pub mod structure;
