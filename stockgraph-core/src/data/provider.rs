//! Quote source trait, structured request errors, and progress reporting.
//!
//! The QuoteSource trait abstracts over data sources (the paginated KRX
//! listing, HTML fixtures in tests) so the panel assembler never depends on a
//! transport.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{QuoteSeries, SecurityId};

/// Failure of a single request to a data source.
///
/// Variants classify themselves as retryable or not; the retry policy only
/// re-attempts retryable ones.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("cannot parse number '{text}': {reason}")]
    InvalidNumber { text: String, reason: String },

    #[error("cannot parse date '{0}'")]
    InvalidDate(String),

    #[error("security not found: {0}")]
    SecurityNotFound(SecurityId),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Network faults, server-side HTTP errors and malformed pages (a page cut
    /// off mid-transfer parses as malformed) are retryable; a missing security
    /// or a client-side HTTP error is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            DataError::NetworkUnreachable(_)
            | DataError::ResponseFormatChanged(_)
            | DataError::InvalidNumber { .. }
            | DataError::InvalidDate(_)
            | DataError::Other(_) => true,
            DataError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DataError::SecurityNotFound(_) => false,
        }
    }
}

/// A source of daily quotes for one security at a time.
///
/// `fetch` performs a single attempt; retrying is the caller's decision (see
/// [`crate::data::retry::RetryPolicy`]).
pub trait QuoteSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Bars dated on or after `start`, oldest first.
    fn fetch(&self, security: &SecurityId, start: NaiveDate) -> Result<QuoteSeries, DataError>;
}

/// Progress callback for multi-security fetches.
pub trait FetchProgress: Send + Sync {
    /// Called before a security is fetched.
    fn on_start(&self, index: usize, total: usize, security: &SecurityId, name: &str);

    /// Called when a security's fetch has finished (after retries).
    fn on_complete(&self, index: usize, security: &SecurityId, bars: Result<usize, &str>);
}

/// Progress reporter that emits `tracing` events.
pub struct TracingProgress;

impl FetchProgress for TracingProgress {
    fn on_start(&self, index: usize, total: usize, security: &SecurityId, name: &str) {
        tracing::info!(index, total, %security, "fetching quote history for \"{name}\"");
    }

    fn on_complete(&self, index: usize, security: &SecurityId, bars: Result<usize, &str>) {
        match bars {
            Ok(n) => tracing::debug!(index, %security, bars = n, "fetched"),
            Err(e) => tracing::warn!(index, %security, error = e, "fetch failed"),
        }
    }
}

/// Progress reporter that discards all events.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _: usize, _: usize, _: &SecurityId, _: &str) {}
    fn on_complete(&self, _: usize, _: &SecurityId, _: Result<usize, &str>) {}
}
