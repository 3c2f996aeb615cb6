//! Serializable pipeline configuration.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockgraph_core::data::{AlignmentPolicy, FetchConfig, SourceConfig, Universe, UniverseError};
use stockgraph_core::structure::{StructureConfig, DEFAULT_EDGE_THRESHOLD};

/// Unique identifier for a pipeline run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot hash config: {0}")]
    Hash(#[from] serde_json::Error),

    #[error("invalid universe: {0}")]
    Universe(#[from] UniverseError),
}

/// Everything needed to reproduce a clustering run.
///
/// Every section has a default, so an empty file is a valid config: the
/// default KRX universe from 2017-01-01 with the stock estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// First trading date to fetch (inclusive).
    pub start_date: NaiveDate,

    /// Partial correlations at or below this magnitude are not reported as edges.
    pub edge_threshold: f64,

    pub alignment: AlignmentPolicy,

    pub source: SourceConfig,

    pub fetch: FetchConfig,

    pub structure: StructureConfig,

    pub universe: Universe,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            edge_threshold: DEFAULT_EDGE_THRESHOLD,
            alignment: AlignmentPolicy::default(),
            source: SourceConfig::default(),
            fetch: FetchConfig::default(),
            structure: StructureConfig::default(),
            universe: Universe::default_krx(),
        }
    }
}

pub fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 1, 1).unwrap_or_default()
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        if config.universe.is_empty() {
            return Err(UniverseError::Empty.into());
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic hash of the full configuration.
    ///
    /// Two runs with identical configs share a run id.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockgraph_core::data::{FailurePolicy, RetryPolicy};

    #[test]
    fn empty_file_gives_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2017, 1, 1).unwrap());
        assert_eq!(config.universe.len(), 41);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
start_date = "2020-06-01"
alignment = "positional"

[fetch]
max_concurrency = 4
failure_policy = "skip_failed"

[structure.affinity]
seed = 7

[universe.securities]
"005930" = "삼성전자"
"000660" = "sk하이닉스"
"035420" = "네이버"
"#,
        )
        .unwrap();

        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2020, 6, 1).unwrap());
        assert_eq!(config.alignment, AlignmentPolicy::Positional);
        assert_eq!(config.fetch.max_concurrency, 4);
        assert_eq!(config.fetch.failure_policy, FailurePolicy::SkipFailed);
        assert_eq!(config.fetch.retry, RetryPolicy::default());
        assert_eq!(config.structure.affinity.seed, 7);
        assert_eq!(config.structure.affinity.damping, 0.5);
        assert_eq!(config.universe.get_stock_items()[0].as_str(), "000660");
    }

    #[test]
    fn toml_round_trip() {
        let config = PipelineConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(PipelineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn empty_universe_is_rejected() {
        let err = PipelineConfig::from_toml("[universe.securities]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Universe(UniverseError::Empty)));
    }

    #[test]
    fn run_id_deterministic() {
        let config = PipelineConfig::default();
        let id1 = config.run_id().unwrap();
        let id2 = config.run_id().unwrap();
        assert_eq!(id1, id2, "RunId should be deterministic");
        assert_eq!(id1.len(), 64);
    }

    #[test]
    fn run_id_changes_with_params() {
        let config1 = PipelineConfig::default();
        let config2 = PipelineConfig {
            start_date: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
            ..PipelineConfig::default()
        };
        assert_ne!(config1.run_id().unwrap(), config2.run_id().unwrap());
    }
}
