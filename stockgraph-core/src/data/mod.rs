//! Quote acquisition and panel preparation.

pub mod align;
pub mod assemble;
pub mod frame;
pub mod naver;
pub mod number;
pub mod provider;
pub mod retry;
pub mod universe;
pub mod variation;

pub use align::{align_panel, AlignedPanel, AlignmentError, AlignmentPolicy};
pub use assemble::{build_panel, AssembledPanel, FailurePolicy, FetchConfig};
pub use frame::{panel_frames, series_frame};
pub use naver::{HttpPageFetcher, NaverDailySource, PageFetcher, SourceConfig};
pub use number::NumberFormat;
pub use provider::{DataError, FetchProgress, NoProgress, QuoteSource, TracingProgress};
pub use retry::{fetch_with_retry, Backoff, FetchFailure, RetryPolicy};
pub use universe::{Universe, UniverseError};
pub use variation::{extract_variations, ShapeMismatch};
