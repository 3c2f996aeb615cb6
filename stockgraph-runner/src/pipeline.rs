//! Pipeline runner: panel assembly, alignment, extraction, clustering.
//!
//! One entry point, `run_pipeline()`, turns a config and a quote source into
//! a complete `PipelineResult` or a single `PipelineError` naming the stage
//! that failed. No partial results.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use stockgraph_core::data::{
    align_panel, build_panel, extract_variations, AlignmentError, FetchFailure, FetchProgress,
    QuoteSource, ShapeMismatch,
};
use stockgraph_core::domain::SecurityId;
use stockgraph_core::structure::{cluster, ClusteringFailure, Edge};

use crate::config::{ConfigError, PipelineConfig, RunId};

/// Current schema version for persisted results.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("fetch stage: {0}")]
    Fetch(#[from] FetchFailure),
    #[error("alignment stage: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("extraction stage: {0}")]
    Extraction(#[from] ShapeMismatch),
    #[error("clustering stage: {0}")]
    Clustering(#[from] ClusteringFailure),
}

impl PipelineError {
    /// Short name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Alignment(_) => "alignment",
            PipelineError::Extraction(_) => "extraction",
            PipelineError::Clustering(_) => "clustering",
        }
    }
}

/// One clustered security with its planar position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteredSecurity {
    pub id: SecurityId,
    pub name: String,
    pub label: usize,
    pub x: f64,
    pub y: f64,
    /// `1 / sqrt(precision_ii)`, for node sizing.
    pub node_size: f64,
}

/// A security left out under the skip-failed policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSecurity {
    pub id: SecurityId,
    pub attempts: u32,
    pub cause: String,
}

/// Complete result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub source: String,
    pub start_date: NaiveDate,
    /// Common trading dates the variations were taken on.
    pub dates: Vec<NaiveDate>,
    /// Clustered securities in universe order.
    pub securities: Vec<ClusteredSecurity>,
    pub skipped: Vec<SkippedSecurity>,
    /// Graphical lasso penalty selected by cross-validation.
    pub alpha: f64,
    /// Largest cluster label.
    pub n_labels: usize,
    /// Partial-correlation edges; indices refer to `securities`.
    pub edges: Vec<Edge>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl PipelineResult {
    pub fn labels(&self) -> Vec<usize> {
        self.securities.iter().map(|s| s.label).collect()
    }

    /// Member names of each cluster, by label.
    pub fn clusters(&self) -> Vec<Vec<&str>> {
        let mut groups = vec![Vec::new(); self.n_labels + 1];
        for s in &self.securities {
            if let Some(group) = groups.get_mut(s.label) {
                group.push(s.name.as_str());
            }
        }
        groups
    }
}

/// Run the full pipeline for `config` against `source`.
pub fn run_pipeline(
    config: &PipelineConfig,
    source: &dyn QuoteSource,
    progress: &dyn FetchProgress,
) -> Result<PipelineResult, PipelineError> {
    let run_id = config.run_id()?;
    info!(
        run_id = %run_id,
        source = source.name(),
        securities = config.universe.len(),
        start = %config.start_date,
        "starting pipeline"
    );

    let assembled = build_panel(
        source,
        &config.universe,
        config.start_date,
        &config.fetch,
        progress,
    )?;
    let aligned = align_panel(&assembled.panel, config.alignment)?;
    let variations = extract_variations(&aligned.panel)?;
    info!(
        securities = variations.nrows(),
        days = variations.ncols(),
        "variations extracted"
    );

    let model = cluster(&variations, &aligned.panel.names(), &config.structure)?;

    let sizes = model.node_sizes();
    let securities = aligned
        .panel
        .entries()
        .iter()
        .enumerate()
        .map(|(i, entry)| ClusteredSecurity {
            id: entry.security.clone(),
            name: entry.name.clone(),
            label: model.labels[i],
            x: model.embedding[(0, i)],
            y: model.embedding[(1, i)],
            node_size: sizes[i],
        })
        .collect();

    let skipped = assembled
        .skipped
        .iter()
        .map(|f| SkippedSecurity {
            id: f.security.clone(),
            attempts: f.attempts,
            cause: f.cause.to_string(),
        })
        .collect();

    Ok(PipelineResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        source: source.name().to_string(),
        start_date: config.start_date,
        dates: aligned.dates,
        securities,
        skipped,
        alpha: model.alpha,
        n_labels: model.n_labels,
        edges: model.edges(config.edge_threshold),
    })
}
