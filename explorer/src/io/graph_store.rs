//! Navigation graph load/save with schema validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::core::graph::NavigationGraph;
use crate::io::schema::{GRAPH_SCHEMA, validate_schema};

/// Load a graph document, validate it, and rebuild its adjacency indices.
pub fn load_graph(path: &Path) -> Result<NavigationGraph> {
    debug!(path = %path.display(), "loading graph");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read graph {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse graph {}", path.display()))?;
    validate_schema(GRAPH_SCHEMA, &value, "graph")
        .with_context(|| format!("validate graph {}", path.display()))?;
    let graph: NavigationGraph = serde_json::from_value(value)
        .with_context(|| format!("deserialize graph {}", path.display()))?;
    Ok(graph)
}

/// Atomically write the graph document (temp file + rename).
pub fn write_graph(path: &Path, graph: &NavigationGraph) -> Result<()> {
    debug!(path = %path.display(), edges = graph.edges().len(), "writing graph");
    let mut buf = serde_json::to_string_pretty(graph).context("serialize graph")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
