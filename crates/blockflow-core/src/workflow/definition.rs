//! Graph source adapter: YAML/JSON parsing and filesystem load/save.
//!
//! Parsing only checks that the document has the `WorkflowGraph` shape.
//! Structural rules are checked by `validate::validate`, which reports every
//! violation instead of stopping at the first.

use std::path::Path;

use blockflow_types::graph::WorkflowGraph;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while reading or writing graph documents.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML document into a `WorkflowGraph`.
pub fn parse_graph_yaml(yaml: &str) -> Result<WorkflowGraph, WorkflowError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Parse a JSON document into a `WorkflowGraph`.
pub fn parse_graph_json(json: &str) -> Result<WorkflowGraph, WorkflowError> {
    serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Serialize a `WorkflowGraph` to a YAML string.
pub fn serialize_graph_yaml(graph: &WorkflowGraph) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(graph).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// Load a graph from disk. `.json` files are parsed as JSON, anything else as YAML.
pub fn load_graph_file(path: &Path) -> Result<WorkflowGraph, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    if is_json(path) {
        parse_graph_json(&content)
    } else {
        parse_graph_yaml(&content)
    }
}

/// Save a graph to disk in the format implied by its extension.
///
/// Creates parent directories if they don't exist.
pub fn save_graph_file(path: &Path, graph: &WorkflowGraph) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = if is_json(path) {
        serde_json::to_string_pretty(graph).map_err(|e| WorkflowError::ParseError(e.to_string()))?
    } else {
        serialize_graph_yaml(graph)?
    };
    std::fs::write(path, content)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_types::graph::{BlockKind, ConnectionKind};
    use blockflow_types::recovery::{RecoveryAction, RecoveryStrategy};

    const SUMMARIZE_YAML: &str = r#"
metadata:
  name: summarize-and-route
  description: Summarize a document, then route on its length
blocks:
  - id: summarize
    label: Summarize
    kind: model_call
    properties:
      prompt: "Summarize: {{ input.text }}"
      model: gpt-4o-mini
    recovery:
      - name: retry-twice
        strategy: retry
        max_attempts: 2
      - name: canned-answer
        strategy: degrade
        value: "summary unavailable"
  - id: check
    kind: condition
    properties:
      expression: "inputs.summarize|length > 20"
  - id: long
    kind: transform
    properties:
      operation: uppercase
connections:
  - source: summarize
    target: check
  - source: check
    target: long
    kind:
      type: conditional
      branch: true
"#;

    #[test]
    fn test_parse_yaml_graph() {
        let graph = parse_graph_yaml(SUMMARIZE_YAML).unwrap();
        assert_eq!(graph.metadata.name, "summarize-and-route");
        assert_eq!(graph.blocks.len(), 3);
        assert_eq!(graph.blocks[0].kind, BlockKind::ModelCall);
        assert_eq!(graph.blocks[0].label, "Summarize");
        assert_eq!(graph.connections[0].kind, ConnectionKind::DataFlow);
        assert_eq!(
            graph.connections[1].kind,
            ConnectionKind::Conditional { branch: true }
        );

        let recovery = graph.blocks[0].recovery.as_ref().unwrap();
        assert_eq!(recovery.len(), 2);
        assert!(matches!(
            recovery[0].action,
            RecoveryAction::Retry {
                max_attempts: 2,
                backoff_ms: 0
            }
        ));
        assert_eq!(recovery[1].strategy(), RecoveryStrategy::Degrade);
    }

    #[test]
    fn test_parse_yaml_keeps_unknown_kind() {
        let yaml = r#"
metadata:
  name: odd
blocks:
  - id: a
    kind: oauth_card
"#;
        let graph = parse_graph_yaml(yaml).unwrap();
        assert!(!graph.blocks[0].kind.is_supported());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = parse_graph_yaml("blocks: [unterminated").unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn test_parse_json_graph() {
        let json = r#"{
            "metadata": { "name": "tiny" },
            "blocks": [
                { "id": "a", "kind": "transform", "properties": { "operation": "trim" } }
            ]
        }"#;
        let graph = parse_graph_json(json).unwrap();
        assert_eq!(graph.blocks.len(), 1);
        assert!(graph.connections.is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let graph = parse_graph_yaml(SUMMARIZE_YAML).unwrap();

        let yaml_path = dir.path().join("graphs/summarize.yaml");
        save_graph_file(&yaml_path, &graph).unwrap();
        let loaded = load_graph_file(&yaml_path).unwrap();
        assert_eq!(loaded.id, graph.id);
        assert_eq!(loaded.blocks.len(), 3);

        let json_path = dir.path().join("summarize.json");
        save_graph_file(&json_path, &graph).unwrap();
        let content = std::fs::read_to_string(&json_path).unwrap();
        assert!(content.trim_start().starts_with('{'));
        let loaded = load_graph_file(&json_path).unwrap();
        assert_eq!(loaded.connections.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_graph_file(Path::new("/nonexistent/graph.yaml")).unwrap_err();
        assert!(matches!(err, WorkflowError::IoError(_)));
    }
}
