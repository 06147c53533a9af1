//! Trace events for the execution observer stream.
//!
//! Every state change of a run is a `TraceEvent`. A run's stream is finite:
//! it starts with `RunStarted` and ends with exactly one `RunFinished`,
//! after which nothing else is emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureReason;
use crate::execution::{BlockResult, BlockStatus, RunSummary};
use crate::recovery::{RecoveryStepStatus, RecoveryStrategy};

/// One entry in a run's trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub execution_id: Uuid,
    /// Monotonic sequence number within the run, starting at 0.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

impl TraceEvent {
    /// Whether this is the final event of the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, TraceEventKind::RunFinished { .. })
    }

    /// Block the event refers to, if any.
    pub fn block_id(&self) -> Option<&str> {
        match &self.kind {
            TraceEventKind::Block { block_id, .. } | TraceEventKind::Recovery { block_id, .. } => {
                Some(block_id)
            }
            TraceEventKind::BlockFinished { result } => Some(&result.block_id),
            _ => None,
        }
    }
}

/// Payload of a trace event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEventKind {
    /// The run was accepted and its first blocks are about to be dispatched.
    RunStarted {
        workflow_name: String,
        block_count: usize,
    },

    /// A single invocation of a block started or ended.
    Block {
        block_id: String,
        status: BlockStatus,
        /// Invocation number the transition belongs to (0 for skips).
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<FailureReason>,
        duration_ms: u64,
    },

    /// A recovery step of a block changed status.
    Recovery {
        block_id: String,
        step_index: usize,
        step_name: String,
        strategy: RecoveryStrategy,
        status: RecoveryStepStatus,
        attempt: u32,
    },

    /// A block reached its terminal status and its result was recorded.
    BlockFinished { result: BlockResult },

    /// The run reached a terminal status. Always the last event.
    RunFinished { summary: RunSummary },
}
