//! Panel — the per-security quote series of one universe, in universe order.

use serde::{Deserialize, Serialize};

use super::bar::QuoteSeries;
use super::ids::SecurityId;

/// One security's slot in a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelEntry {
    pub security: SecurityId,
    pub name: String,
    pub series: QuoteSeries,
}

/// Quote series for an ordered universe of securities.
///
/// Order is fixed at construction and is the row order of every matrix
/// derived from the panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    entries: Vec<PanelEntry>,
}

impl Panel {
    pub fn new(entries: Vec<PanelEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PanelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, security: &SecurityId) -> Option<&QuoteSeries> {
        self.entries
            .iter()
            .find(|e| &e.security == security)
            .map(|e| &e.series)
    }

    pub fn securities(&self) -> Vec<SecurityId> {
        self.entries.iter().map(|e| e.security.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Common series length, or `None` if lengths differ (or the panel is empty).
    pub fn common_len(&self) -> Option<usize> {
        let first = self.entries.first()?.series.len();
        self.entries
            .iter()
            .all(|e| e.series.len() == first)
            .then_some(first)
    }
}
