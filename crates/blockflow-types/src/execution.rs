//! Per-block results and run summaries.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::FailureReason;
use crate::recovery::RecoveryExecutionState;

/// Status of a single block within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Recovered,
    Skipped,
    Escalated,
}

impl BlockStatus {
    /// Whether the block will not change status again in this run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, BlockStatus::Pending | BlockStatus::Running)
    }

    /// Whether the block produced a usable output.
    pub fn produced_output(self) -> bool {
        matches!(self, BlockStatus::Succeeded | BlockStatus::Recovered)
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockStatus::Pending => "pending",
            BlockStatus::Running => "running",
            BlockStatus::Succeeded => "succeeded",
            BlockStatus::Failed => "failed",
            BlockStatus::Recovered => "recovered",
            BlockStatus::Skipped => "skipped",
            BlockStatus::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Terminal record of one block in one run.
///
/// Appended once to the execution context and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResult {
    pub block_id: String,
    pub status: BlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReason>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Capability invocations: the initial run plus every recovery re-invocation.
    pub attempts: u32,
    /// Output came from a degrade step.
    #[serde(default)]
    pub degraded: bool,
    /// A compensating action ran after the failure.
    #[serde(default)]
    pub compensated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryExecutionState>,
    pub duration_ms: u64,
}

impl BlockResult {
    /// Result for a block that never ran because an upstream did not satisfy it.
    pub fn skipped(block_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            block_id: block_id.into(),
            status: BlockStatus::Skipped,
            output: None,
            error: None,
            started_at: now,
            completed_at: now,
            attempts: 0,
            degraded: false,
            compensated: false,
            recovery: None,
            duration_ms: 0,
        }
    }
}

/// Final (or in-progress) summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub execution_id: Uuid,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Block results in the order they were recorded.
    pub block_results: Vec<BlockResult>,
    /// Number of block results per status.
    pub counts: BTreeMap<BlockStatus, usize>,
}

impl RunSummary {
    pub fn new(
        execution_id: Uuid,
        workflow_name: impl Into<String>,
        status: RunStatus,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        block_results: Vec<BlockResult>,
    ) -> Self {
        let mut counts = BTreeMap::new();
        for result in &block_results {
            *counts.entry(result.status).or_insert(0) += 1;
        }
        Self {
            execution_id,
            workflow_name: workflow_name.into(),
            status,
            started_at,
            completed_at,
            block_results,
            counts,
        }
    }

    /// Look up the result for a block.
    pub fn result(&self, block_id: &str) -> Option<&BlockResult> {
        self.block_results.iter().find(|r| r.block_id == block_id)
    }

    pub fn count(&self, status: BlockStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Elapsed wall-clock time, up to now for a live run.
    pub fn elapsed_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;

    fn result(id: &str, status: BlockStatus) -> BlockResult {
        BlockResult {
            status,
            ..BlockResult::skipped(id)
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!BlockStatus::Pending.is_terminal());
        assert!(!BlockStatus::Running.is_terminal());
        assert!(BlockStatus::Skipped.is_terminal());
        assert!(BlockStatus::Recovered.produced_output());
        assert!(!BlockStatus::Escalated.produced_output());
    }

    #[test]
    fn summary_counts_by_status() {
        let summary = RunSummary::new(
            Uuid::now_v7(),
            "counts",
            RunStatus::Failed,
            Utc::now(),
            Some(Utc::now()),
            vec![
                result("a", BlockStatus::Succeeded),
                result("b", BlockStatus::Succeeded),
                result("c", BlockStatus::Failed),
            ],
        );
        assert_eq!(summary.count(BlockStatus::Succeeded), 2);
        assert_eq!(summary.count(BlockStatus::Failed), 1);
        assert_eq!(summary.count(BlockStatus::Skipped), 0);
        assert!(summary.result("c").is_some());
    }

    #[test]
    fn block_result_serializes_failure_reason() {
        let mut r = result("a", BlockStatus::Failed);
        r.error = Some(CapabilityError::timeout("slow").into());
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["type"], "capability");
        assert_eq!(json["error"]["kind"], "timeout");
        assert!(json.get("output").is_none());
    }
}
