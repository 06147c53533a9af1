//! Dependency index, Kahn topological order, and parallel wave computation.
//!
//! The scheduler drives execution with the same in-degree bookkeeping that
//! `topological_order` uses: a block becomes eligible once every incoming
//! connection's source has reached a terminal status.

use std::collections::{HashMap, VecDeque};

use blockflow_types::graph::{Connection, WorkflowGraph};

/// Errors from ordering a graph that was not validated first.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DagError {
    #[error("cycle detected involving blocks: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("connection {from} -> {to} references an unknown block")]
    UnknownBlock { from: String, to: String },
}

// ---------------------------------------------------------------------------
// Dependency index
// ---------------------------------------------------------------------------

/// Per-block incoming/outgoing connection lists, in declaration order.
#[derive(Debug, Clone)]
pub struct DependencyIndex {
    block_ids: Vec<String>,
    incoming: HashMap<String, Vec<Connection>>,
    outgoing: HashMap<String, Vec<Connection>>,
}

impl DependencyIndex {
    /// Index a graph. Fails on connections that reference unknown blocks.
    pub fn build(graph: &WorkflowGraph) -> Result<Self, DagError> {
        let mut incoming: HashMap<String, Vec<Connection>> = HashMap::new();
        let mut outgoing: HashMap<String, Vec<Connection>> = HashMap::new();
        let mut block_ids = Vec::with_capacity(graph.blocks.len());

        for block in &graph.blocks {
            if !incoming.contains_key(&block.id) {
                block_ids.push(block.id.clone());
                incoming.insert(block.id.clone(), Vec::new());
                outgoing.insert(block.id.clone(), Vec::new());
            }
        }

        for conn in &graph.connections {
            if !incoming.contains_key(&conn.source) || !incoming.contains_key(&conn.target) {
                return Err(DagError::UnknownBlock {
                    from: conn.source.clone(),
                    to: conn.target.clone(),
                });
            }
            if let Some(list) = incoming.get_mut(&conn.target) {
                list.push(conn.clone());
            }
            if let Some(list) = outgoing.get_mut(&conn.source) {
                list.push(conn.clone());
            }
        }

        Ok(Self {
            block_ids,
            incoming,
            outgoing,
        })
    }

    /// Block IDs in declaration order.
    pub fn block_ids(&self) -> &[String] {
        &self.block_ids
    }

    pub fn incoming(&self, block_id: &str) -> &[Connection] {
        self.incoming.get(block_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn outgoing(&self, block_id: &str) -> &[Connection] {
        self.outgoing.get(block_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Initial in-degree of every block (parallel connections count separately).
    pub fn in_degrees(&self) -> HashMap<String, usize> {
        self.incoming
            .iter()
            .map(|(id, conns)| (id.clone(), conns.len()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Kahn's algorithm
// ---------------------------------------------------------------------------

/// Topologically order a graph with Kahn's algorithm.
///
/// Ties are broken by declaration order, so the result is deterministic.
pub fn topological_order(graph: &WorkflowGraph) -> Result<Vec<String>, DagError> {
    Ok(execution_waves(graph)?.into_iter().flatten().collect())
}

/// Group blocks into waves: every block in wave `n` depends only on blocks
/// in waves `< n`, so a wave's blocks can run concurrently.
pub fn execution_waves(graph: &WorkflowGraph) -> Result<Vec<Vec<String>>, DagError> {
    let index = DependencyIndex::build(graph)?;
    let mut in_degree = index.in_degrees();

    let mut current: VecDeque<String> = index
        .block_ids()
        .iter()
        .filter(|id| in_degree[id.as_str()] == 0)
        .cloned()
        .collect();

    let mut waves = Vec::new();
    let mut visited = 0usize;

    while !current.is_empty() {
        let mut next = VecDeque::new();
        let mut wave = Vec::with_capacity(current.len());

        while let Some(id) = current.pop_front() {
            for conn in index.outgoing(&id) {
                if let Some(deg) = in_degree.get_mut(&conn.target) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push_back(conn.target.clone());
                    }
                }
            }
            wave.push(id);
        }

        visited += wave.len();
        waves.push(wave);
        current = next;
    }

    if visited < index.block_ids().len() {
        let remaining = index
            .block_ids()
            .iter()
            .filter(|id| in_degree[id.as_str()] > 0)
            .cloned()
            .collect();
        return Err(DagError::CycleDetected(remaining));
    }

    Ok(waves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
