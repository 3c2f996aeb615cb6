//! Explicit retry policy applied at the call site.
//!
//! A policy bounds the number of attempts, chooses the delay between them,
//! and only re-attempts errors that classify themselves as retryable.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::provider::{DataError, QuoteSource};
use crate::domain::{QuoteSeries, SecurityId};

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(retry - 1)`.
    Exponential { base_ms: u64 },
}

impl Backoff {
    fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms } => {
                Duration::from_millis(base_ms.saturating_mul(1u64 << (retry - 1).min(16)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::None,
        }
    }
}

/// The last error after the policy gave up, with the number of attempts made.
#[derive(Debug, Clone, PartialEq)]
pub struct Exhausted {
    pub attempts: u32,
    pub last: DataError,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut(u32) -> Result<T, DataError>,
    {
        let budget = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < budget => {
                    tracing::warn!(attempt, budget, error = %e, "attempt failed, retrying");
                    let delay = self.backoff.delay(attempt);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
            }
        }
    }
}

/// A security's quotes could not be fetched within the retry budget.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to fetch {security} after {attempts} attempt(s): {cause}")]
pub struct FetchFailure {
    pub security: SecurityId,
    pub attempts: u32,
    #[source]
    pub cause: DataError,
}

/// Fetch one security through `source`, retrying per `policy`.
pub fn fetch_with_retry(
    source: &dyn QuoteSource,
    security: &SecurityId,
    start: NaiveDate,
    policy: &RetryPolicy,
) -> Result<QuoteSeries, FetchFailure> {
    policy
        .run(|_| source.fetch(security, start))
        .map_err(|e| FetchFailure {
            security: security.clone(),
            attempts: e.attempts,
            cause: e.last,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn succeeds_on_third_attempt() {
        let calls = Cell::new(0);
        let result = RetryPolicy::default().run(|attempt| {
            calls.set(calls.get() + 1);
            if attempt < 3 {
                Err(DataError::NetworkUnreachable("reset".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_budget() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::default().run(|_| {
            calls.set(calls.get() + 1);
            Err(DataError::NetworkUnreachable("down".into()))
        });
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_errors_fail_fast() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::default().run(|_| {
            calls.set(calls.get() + 1);
            Err(DataError::SecurityNotFound("999999".into()))
        });
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            backoff: Backoff::None,
        };
        assert_eq!(policy.run(|a| Ok::<_, DataError>(a)).unwrap(), 1);
    }

    #[test]
    fn exponential_backoff_doubles() {
        let b = Backoff::Exponential { base_ms: 100 };
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(400));
        assert_eq!(Backoff::Fixed { delay_ms: 50 }.delay(3), Duration::from_millis(50));
    }
}
