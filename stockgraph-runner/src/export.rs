//! Result export — JSON and CSV artifacts of a pipeline run.
//!
//! - **JSON**: full round-trip serialization with schema versioning
//! - **CSV**: cluster assignment, planar embedding, and partial-correlation
//!   edges for external renderers
//!
//! Persisted results include a `schema_version` field. Unknown versions are
//! rejected on load.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::pipeline::{PipelineResult, SCHEMA_VERSION};

pub const RESULT_FILE: &str = "result.json";
pub const CLUSTERS_FILE: &str = "clusters.csv";
pub const EMBEDDING_FILE: &str = "embedding.csv";
pub const EDGES_FILE: &str = "edges.csv";

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(result: &PipelineResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize PipelineResult to JSON")
}

/// Deserialize a `PipelineResult`, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<PipelineResult> {
    let result: PipelineResult =
        serde_json::from_str(json).context("failed to deserialize PipelineResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: index, id, name, label
pub fn export_clusters_csv(result: &PipelineResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["index", "id", "name", "label"])?;
    for (i, s) in result.securities.iter().enumerate() {
        wtr.write_record([
            i.to_string().as_str(),
            s.id.as_str(),
            s.name.as_str(),
            s.label.to_string().as_str(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: id, x, y
pub fn export_embedding_csv(result: &PipelineResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["id", "x", "y"])?;
    for s in &result.securities {
        wtr.write_record([s.id.as_str(), &format!("{:.8}", s.x), &format!("{:.8}", s.y)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: source, target, partial_correlation (ids, not indices)
pub fn export_edges_csv(result: &PipelineResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["source", "target", "partial_correlation"])?;
    for edge in &result.edges {
        let id = |i: usize| -> Result<&str> {
            result
                .securities
                .get(i)
                .map(|s| s.id.as_str())
                .with_context(|| format!("edge refers to unknown security index {i}"))
        };
        wtr.write_record([id(edge.source)?, id(edge.target)?, &format!("{:.6}", edge.strength)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `result.json`, `clusters.csv`, `embedding.csv` and `edges.csv` into
/// `output_dir`, creating it if needed.
pub fn save_artifacts(result: &PipelineResult, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let files = [
        (RESULT_FILE, export_json(result)?),
        (CLUSTERS_FILE, export_clusters_csv(result)?),
        (EMBEDDING_FILE, export_embedding_csv(result)?),
        (EDGES_FILE, export_edges_csv(result)?),
    ];
    for (name, content) in files {
        let path = output_dir.join(name);
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

/// Load a saved result back from an artifact directory.
pub fn load_artifacts(dir: &Path) -> Result<PipelineResult> {
    let path = dir.join(RESULT_FILE);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}
