//! Panel assembly — fetch every security of a universe into one panel.
//!
//! Fetches run sequentially by default. With `max_concurrency > 1` they run
//! in a bounded rayon pool; results are still placed in universe order and
//! the failure policy sees them in that order, so the outcome does not depend
//! on completion order.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::provider::{FetchProgress, QuoteSource};
use super::retry::{fetch_with_retry, FetchFailure, RetryPolicy};
use super::universe::Universe;
use crate::domain::{Panel, PanelEntry, QuoteSeries, SecurityId};

/// What to do when one security exhausts its retry budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole build with the first failure in universe order.
    #[default]
    AbortAll,
    /// Drop failed securities and report them next to the panel.
    SkipFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound on simultaneous requests. 1 means sequential.
    pub max_concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            failure_policy: FailurePolicy::AbortAll,
            retry: RetryPolicy::default(),
        }
    }
}

/// A built panel plus the securities left out under [`FailurePolicy::SkipFailed`].
#[derive(Debug, Clone)]
pub struct AssembledPanel {
    pub panel: Panel,
    pub skipped: Vec<FetchFailure>,
}

type FetchOutcome = Result<QuoteSeries, FetchFailure>;

/// Fetch quotes for every security in `universe`, dated on or after `start`.
pub fn build_panel(
    source: &dyn QuoteSource,
    universe: &Universe,
    start: NaiveDate,
    config: &FetchConfig,
    progress: &dyn FetchProgress,
) -> Result<AssembledPanel, FetchFailure> {
    let members: Vec<(&SecurityId, &String)> = universe.securities.iter().collect();
    let total = members.len();

    let fetch_one = |index: usize, security: &SecurityId, name: &str| -> FetchOutcome {
        progress.on_start(index, total, security, name);
        let outcome = fetch_with_retry(source, security, start, &config.retry);
        let report = match &outcome {
            Ok(series) => Ok(series.len()),
            Err(e) => Err(e.to_string()),
        };
        progress.on_complete(index, security, report.as_ref().map(|n| *n).map_err(|e| e.as_str()));
        outcome
    };

    let mut entries = Vec::with_capacity(total);
    let mut skipped = Vec::new();
    let mut settle = |security: &SecurityId, name: &str, outcome: FetchOutcome| {
        match outcome {
            Ok(series) => {
                entries.push(PanelEntry {
                    security: security.clone(),
                    name: name.to_string(),
                    series,
                });
                Ok(())
            }
            Err(failure) => match config.failure_policy {
                FailurePolicy::AbortAll => Err(failure),
                FailurePolicy::SkipFailed => {
                    tracing::warn!(%security, error = %failure, "skipping security");
                    skipped.push(failure);
                    Ok(())
                }
            },
        }
    };

    let pool = if config.max_concurrency > 1 {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrency)
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!(error = %e, "cannot build fetch pool, fetching sequentially");
                None
            }
        }
    } else {
        None
    };

    match pool {
        Some(pool) => {
            let outcomes: Vec<FetchOutcome> = pool.install(|| {
                members
                    .par_iter()
                    .enumerate()
                    .map(|(i, (security, name))| fetch_one(i, security, name))
                    .collect()
            });
            for ((security, name), outcome) in members.iter().zip(outcomes) {
                settle(security, name, outcome)?;
            }
        }
        None => {
            for (i, (security, name)) in members.iter().enumerate() {
                settle(security, name, fetch_one(i, security, name))?;
            }
        }
    }

    tracing::info!(
        fetched = entries.len(),
        skipped = skipped.len(),
        "panel assembled"
    );

    Ok(AssembledPanel {
        panel: Panel::new(entries),
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{DataError, NoProgress};
    use crate::domain::DailyBar;
    use std::collections::BTreeMap;

    /// Serves one bar per security; ids listed in `broken` always fail.
    struct StubSource {
        broken: Vec<&'static str>,
    }

    impl QuoteSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        fn fetch(&self, security: &SecurityId, start: NaiveDate) -> Result<QuoteSeries, DataError> {
            if self.broken.contains(&security.as_str()) {
                return Err(DataError::NetworkUnreachable(format!("{security} down")));
            }
            let bar = DailyBar {
                trading_date: start,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            };
            Ok(QuoteSeries::new(security.clone(), vec![bar]).unwrap())
        }
    }

    fn universe(ids: &[&str]) -> Universe {
        let map: BTreeMap<SecurityId, String> = ids
            .iter()
            .map(|id| (SecurityId::new(*id), format!("name-{id}")))
            .collect();
        Universe::new(map).unwrap()
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[test]
    fn panel_follows_universe_order() {
        let source = StubSource { broken: vec![] };
        let built = build_panel(
            &source,
            &universe(&["300", "100", "200"]),
            start(),
            &FetchConfig::default(),
            &NoProgress,
        )
        .unwrap();
        let ids: Vec<String> = built.panel.securities().into_iter().map(|s| s.0).collect();
        assert_eq!(ids, vec!["100", "200", "300"]);
        assert_eq!(built.panel.names()[0], "name-100");
        assert!(built.skipped.is_empty());
    }

    #[test]
    fn abort_reports_first_failure_in_universe_order() {
        let source = StubSource {
            broken: vec!["400", "200"],
        };
        let config = FetchConfig {
            max_concurrency: 4,
            ..FetchConfig::default()
        };
        let failure = build_panel(
            &source,
            &universe(&["100", "200", "300", "400"]),
            start(),
            &config,
            &NoProgress,
        )
        .unwrap_err();
        assert_eq!(failure.security, SecurityId::new("200"));
        assert_eq!(failure.attempts, 3);
    }

    #[test]
    fn skip_failed_keeps_the_rest() {
        let source = StubSource {
            broken: vec!["200"],
        };
        let config = FetchConfig {
            failure_policy: FailurePolicy::SkipFailed,
            ..FetchConfig::default()
        };
        let built = build_panel(
            &source,
            &universe(&["100", "200", "300"]),
            start(),
            &config,
            &NoProgress,
        )
        .unwrap();
        assert_eq!(built.panel.names(), vec!["name-100", "name-300"]);
        assert_eq!(built.skipped.len(), 1);
        assert_eq!(built.skipped[0].security, SecurityId::new("200"));
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let source = StubSource { broken: vec![] };
        let u = universe(&["1", "2", "3", "4", "5", "6"]);
        let sequential = build_panel(&source, &u, start(), &FetchConfig::default(), &NoProgress)
            .unwrap();
        let config = FetchConfig {
            max_concurrency: 3,
            ..FetchConfig::default()
        };
        let parallel = build_panel(&source, &u, start(), &config, &NoProgress).unwrap();
        assert_eq!(sequential.panel, parallel.panel);
    }
}
