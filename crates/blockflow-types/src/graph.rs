//! Workflow graph types.
//!
//! A `WorkflowGraph` is the immutable description handed to the engine by the
//! builder: a set of blocks, the directed connections between them, and some
//! descriptive metadata. A running execution owns a read-only snapshot of it.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::recovery::RecoveryStepConfig;

// ---------------------------------------------------------------------------
// Workflow Graph
// ---------------------------------------------------------------------------

/// A complete workflow: blocks, connections, and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Identifier assigned by the graph source.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Descriptive metadata (name, description, timestamps).
    pub metadata: WorkflowMetadata,
    /// Blocks in declaration order.
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Directed edges between blocks.
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl WorkflowGraph {
    /// Look up a block by ID.
    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Connections whose target is `id`.
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.target == id)
    }

    /// Connections whose source is `id`.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.source == id)
    }
}

/// Descriptive workflow metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the graph was first created by the builder.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When the graph was last edited by the builder.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    /// Metadata with the given name and both timestamps set to now.
    pub fn named(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A single unit of work on the canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Unique within a graph.
    pub id: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// The capability this block invokes.
    pub kind: BlockKind,
    /// Kind-specific property bag.
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    /// Explicit recovery path. When absent the engine's recovery policy
    /// picks a default path from the failure's capability error kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<Vec<RecoveryStepConfig>>,
}

impl Block {
    /// Create a block with an empty property bag and no recovery path.
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            kind,
            properties: HashMap::new(),
            recovery: None,
        }
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Builder-style recovery path setter.
    pub fn with_recovery(mut self, path: Vec<RecoveryStepConfig>) -> Self {
        self.recovery = Some(path);
        self
    }

    /// String property accessor.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// Enumerated block capability.
///
/// Serialized as a plain snake_case string. Strings that do not name a
/// supported kind deserialize into `Unsupported` so that graph validation,
/// not parsing, is what rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockKind {
    /// Language-model completion through a capability provider.
    ModelCall,
    /// Pure in-process data transformation.
    Transform,
    /// Boolean expression routing to one of two branches.
    Condition,
    /// Join of several upstream outputs.
    Aggregator,
    /// Any kind string the engine does not know.
    Unsupported(String),
}

impl BlockKind {
    /// Every supported kind, in a stable order.
    pub const SUPPORTED: [BlockKind; 4] = [
        BlockKind::ModelCall,
        BlockKind::Transform,
        BlockKind::Condition,
        BlockKind::Aggregator,
    ];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            BlockKind::ModelCall => "model_call",
            BlockKind::Transform => "transform",
            BlockKind::Condition => "condition",
            BlockKind::Aggregator => "aggregator",
            BlockKind::Unsupported(other) => other.as_str(),
        }
    }

    /// Whether this kind is one the runner can execute.
    pub fn is_supported(&self) -> bool {
        !matches!(self, BlockKind::Unsupported(_))
    }

    /// Properties that must be present for a block of this kind.
    pub fn required_properties(&self) -> &'static [&'static str] {
        match self {
            BlockKind::ModelCall => &["prompt"],
            BlockKind::Transform => &["operation"],
            BlockKind::Condition => &["expression"],
            BlockKind::Aggregator => &[],
            BlockKind::Unsupported(_) => &[],
        }
    }
}

impl From<String> for BlockKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "model_call" => BlockKind::ModelCall,
            "transform" => BlockKind::Transform,
            "condition" => BlockKind::Condition,
            "aggregator" => BlockKind::Aggregator,
            _ => BlockKind::Unsupported(s),
        }
    }
}

impl From<BlockKind> for String {
    fn from(kind: BlockKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A directed edge between two blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Upstream block ID.
    pub source: String,
    /// Downstream block ID.
    pub target: String,
    /// Edge semantics.
    #[serde(default)]
    pub kind: ConnectionKind,
    /// When true, the target still runs if the source fails or escalates.
    #[serde(default)]
    pub tolerate_failure: bool,
}

impl Connection {
    /// A data-flow edge.
    pub fn data(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: ConnectionKind::DataFlow,
            tolerate_failure: false,
        }
    }

    /// A control-flow (ordering only) edge.
    pub fn control(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: ConnectionKind::ControlFlow,
            ..Self::data(source, target)
        }
    }

    /// A conditional edge taken when the source condition evaluates to `branch`.
    pub fn conditional(source: impl Into<String>, target: impl Into<String>, branch: bool) -> Self {
        Self {
            kind: ConnectionKind::Conditional { branch },
            ..Self::data(source, target)
        }
    }

    /// Mark the edge as failure-tolerant.
    pub fn tolerant(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }

    /// Whether the source's output is merged into the target's input.
    pub fn carries_data(&self) -> bool {
        !matches!(self.kind, ConnectionKind::ControlFlow)
    }
}

/// Connection semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Orders execution only; no data is merged.
    ControlFlow,
    /// Source output is merged into the target's input.
    #[default]
    DataFlow,
    /// Taken only when the source condition evaluates to `branch`.
    Conditional { branch: bool },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_kind_roundtrips_as_plain_string() {
        let json = serde_json::to_string(&BlockKind::ModelCall).unwrap();
        assert_eq!(json, "\"model_call\"");
        let kind: BlockKind = serde_json::from_str("\"aggregator\"").unwrap();
        assert_eq!(kind, BlockKind::Aggregator);
    }

    #[test]
    fn unknown_kind_deserializes_as_unsupported() {
        let kind: BlockKind = serde_json::from_str("\"oauth_card\"").unwrap();
        assert_eq!(kind, BlockKind::Unsupported("oauth_card".to_string()));
        assert!(!kind.is_supported());
        assert_eq!(kind.to_string(), "oauth_card");
    }

    #[test]
    fn connection_kind_defaults_to_data_flow() {
        let conn: Connection = serde_json::from_value(json!({
            "source": "a",
            "target": "b"
        }))
        .unwrap();
        assert_eq!(conn.kind, ConnectionKind::DataFlow);
        assert!(!conn.tolerate_failure);
        assert!(conn.carries_data());
    }

    #[test]
    fn conditional_connection_parses_branch() {
        let conn: Connection = serde_json::from_value(json!({
            "source": "check",
            "target": "yes",
            "kind": { "type": "conditional", "branch": true }
        }))
        .unwrap();
        assert_eq!(conn.kind, ConnectionKind::Conditional { branch: true });
    }

    #[test]
    fn control_flow_does_not_carry_data() {
        assert!(!Connection::control("a", "b").carries_data());
    }

    #[test]
    fn graph_lookup_helpers() {
        let graph = WorkflowGraph {
            id: Uuid::now_v7(),
            metadata: WorkflowMetadata::named("lookup"),
            blocks: vec![
                Block::new("a", BlockKind::Transform),
                Block::new("b", BlockKind::Transform),
            ],
            connections: vec![Connection::data("a", "b")],
        };
        assert!(graph.block("a").is_some());
        assert!(graph.block("z").is_none());
        assert_eq!(graph.incoming("b").count(), 1);
        assert_eq!(graph.outgoing("b").count(), 0);
    }

    #[test]
    fn required_properties_per_kind() {
        assert_eq!(BlockKind::ModelCall.required_properties(), &["prompt"]);
        assert!(BlockKind::Aggregator.required_properties().is_empty());
    }
}
