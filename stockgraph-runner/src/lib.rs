//! StockGraph Runner — pipeline orchestration, configuration, result export.
//!
//! This crate builds on `stockgraph-core` to provide:
//! - TOML pipeline configuration with content-addressed run ids
//! - The end-to-end pipeline (fetch, align, extract, cluster)
//! - JSON and CSV artifacts for renderers

pub mod config;
pub mod export;
pub mod pipeline;

pub use config::{default_start_date, ConfigError, PipelineConfig, RunId};
pub use export::{
    export_clusters_csv, export_edges_csv, export_embedding_csv, export_json, import_json,
    load_artifacts, save_artifacts,
};
pub use pipeline::{
    run_pipeline, ClusteredSecurity, PipelineError, PipelineResult, SkippedSecurity,
    SCHEMA_VERSION,
};
