//! Graph validation.
//!
//! `validate` never fails: every rule violation is collected into the
//! returned `ValidationReport`, so a builder can show all problems at once.
//! An invalid graph is never scheduled.

use std::collections::{HashMap, HashSet};

use blockflow_types::error::{ValidationReport, Violation, ViolationKind};
use blockflow_types::graph::{Block, BlockKind, ConnectionKind, WorkflowGraph};
use blockflow_types::recovery::{AlternateBehavior, RecoveryAction};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use super::operation::{BlockOperation, OperationError};

/// Check a graph against every structural rule.
///
/// Rules:
/// - The graph has at least one block and block IDs are unique
/// - Every block kind is supported and its required properties are present and well-formed
/// - Every connection references existing blocks and is not a self-loop
/// - Conditional connections originate from condition blocks
/// - Blocks and connections form a DAG
/// - Explicit recovery paths are well-formed
pub fn validate(graph: &WorkflowGraph) -> ValidationReport {
    let mut report = ValidationReport::default();

    if graph.blocks.is_empty() {
        report.push(Violation::graph(
            ViolationKind::EmptyGraph,
            "workflow graph has no blocks",
        ));
        return report;
    }

    let mut kinds: HashMap<&str, &BlockKind> = HashMap::new();
    for block in &graph.blocks {
        if kinds.insert(block.id.as_str(), &block.kind).is_some() {
            report.push(Violation::block(
                ViolationKind::DuplicateBlockId,
                &block.id,
                format!("block id '{}' is used more than once", block.id),
            ));
        }
        check_block(block, &mut report);
    }

    check_connections(graph, &kinds, &mut report);
    check_acyclic(graph, &kinds, &mut report);

    report
}

fn operation_violation(block_id: &str, err: OperationError) -> Violation {
    let kind = match &err {
        OperationError::UnsupportedKind(_) => ViolationKind::UnsupportedKind,
        OperationError::MissingProperty(_) => ViolationKind::MissingProperty,
        OperationError::InvalidProperty { .. } => ViolationKind::InvalidProperty,
    };
    Violation::block(kind, block_id, err.to_string())
}

fn check_block(block: &Block, report: &mut ValidationReport) {
    if !block.kind.is_supported() {
        let supported = BlockKind::SUPPORTED
            .iter()
            .map(BlockKind::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        report.push(Violation::block(
            ViolationKind::UnsupportedKind,
            &block.id,
            format!("unsupported block kind '{}' (supported: {supported})", block.kind),
        ));
    } else if let Err(err) = BlockOperation::parse(&block.kind, &block.properties) {
        report.push(operation_violation(&block.id, err));
    }

    if let Some(path) = &block.recovery {
        for step in path {
            if let Some(reason) = recovery_step_problem(&step.action) {
                report.push(Violation::block(
                    ViolationKind::InvalidRecovery,
                    &block.id,
                    format!("recovery step '{}': {reason}", step.name),
                ));
            }
        }
    }
}

fn behavior_problem(behavior: &AlternateBehavior) -> Option<String> {
    BlockOperation::parse(&behavior.kind, &behavior.properties)
        .err()
        .map(|e| e.to_string())
}

fn recovery_step_problem(action: &RecoveryAction) -> Option<String> {
    match action {
        RecoveryAction::Retry { max_attempts: 0, .. } => {
            Some("retry max_attempts must be at least 1".to_string())
        }
        RecoveryAction::Fallback { behavior } => {
            behavior_problem(behavior).map(|p| format!("fallback behavior is invalid: {p}"))
        }
        RecoveryAction::Compensate {
            action: Some(behavior),
        } => behavior_problem(behavior).map(|p| format!("compensating action is invalid: {p}")),
        _ => None,
    }
}

fn check_connections(
    graph: &WorkflowGraph,
    kinds: &HashMap<&str, &BlockKind>,
    report: &mut ValidationReport,
) {
    for conn in &graph.connections {
        let source = kinds.get(conn.source.as_str());
        let target_known = kinds.contains_key(conn.target.as_str());

        if source.is_none() || !target_known {
            let missing: Vec<&str> = [
                (source.is_none(), conn.source.as_str()),
                (!target_known, conn.target.as_str()),
            ]
            .into_iter()
            .filter_map(|(missing, id)| missing.then_some(id))
            .collect();
            report.push(Violation::connection(
                ViolationKind::DanglingConnection,
                &conn.source,
                &conn.target,
                format!("references unknown block(s): {}", missing.join(", ")),
            ));
            continue;
        }

        if conn.source == conn.target {
            report.push(Violation::connection(
                ViolationKind::SelfLoop,
                &conn.source,
                &conn.target,
                "a block cannot connect to itself",
            ));
        }

        if let (ConnectionKind::Conditional { .. }, Some(kind)) = (conn.kind, source) {
            if **kind != BlockKind::Condition {
                report.push(Violation::connection(
                    ViolationKind::InvalidConnection,
                    &conn.source,
                    &conn.target,
                    format!("conditional connection must start at a condition block, not '{kind}'"),
                ));
            }
        }
    }
}

/// Detect cycles with Tarjan's strongly connected components (a depth-first
/// search). Every component with more than one block is reported once.
/// Self-loops and dangling connections are reported elsewhere and skipped here.
fn check_acyclic(
    graph: &WorkflowGraph,
    kinds: &HashMap<&str, &BlockKind>,
    report: &mut ValidationReport,
) {
    let mut dag = DiGraph::<&str, ()>::new();
    let mut nodes = HashMap::new();
    for block in &graph.blocks {
        nodes
            .entry(block.id.as_str())
            .or_insert_with(|| dag.add_node(block.id.as_str()));
    }

    for conn in &graph.connections {
        if conn.source == conn.target
            || !kinds.contains_key(conn.source.as_str())
            || !kinds.contains_key(conn.target.as_str())
        {
            continue;
        }
        dag.add_edge(nodes[conn.source.as_str()], nodes[conn.target.as_str()], ());
    }

    let mut reported: HashSet<Vec<&str>> = HashSet::new();
    for component in tarjan_scc(&dag) {
        if component.len() < 2 {
            continue;
        }
        let mut members: Vec<&str> = component.iter().map(|&idx| dag[idx]).collect();
        members.sort_unstable();
        if reported.insert(members.clone()) {
            report.push(Violation::block(
                ViolationKind::Cycle,
                members[0],
                format!("cycle detected involving blocks: {}", members.join(", ")),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
