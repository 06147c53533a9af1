//! Recovery configuration and recovery execution records.
//!
//! A block's Recovery Path is an ordered list of `RecoveryStepConfig`. When
//! the block fails, the recovery controller walks the path and records one
//! `RecoveryStep` per configured step inside a `RecoveryExecutionState`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CapabilityError, CapabilityErrorKind};
use crate::graph::BlockKind;

// ---------------------------------------------------------------------------
// Recovery Path configuration
// ---------------------------------------------------------------------------

/// Recovery strategy vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    None,
    Retry,
    Fallback,
    Degrade,
    Escalate,
    Compensate,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryStrategy::None => "none",
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::Degrade => "degrade",
            RecoveryStrategy::Escalate => "escalate",
            RecoveryStrategy::Compensate => "compensate",
        };
        f.write_str(s)
    }
}

/// An alternate behavior the runner can execute in place of a block:
/// a fallback implementation or a compensating action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternateBehavior {
    pub kind: BlockKind,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

/// What a recovery step does, with its strategy-specific payload.
///
/// Internally tagged by `strategy`:
/// ```yaml
/// - name: retry-model
///   strategy: retry
///   max_attempts: 3
///   backoff_ms: 250
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Placeholder; skipped without consuming an attempt.
    None,
    /// Re-invoke the block with identical input, at most `max_attempts` times.
    Retry {
        #[serde(default = "default_max_attempts")]
        max_attempts: u32,
        #[serde(default)]
        backoff_ms: u64,
    },
    /// Run an alternate behavior; its output becomes the block's output.
    Fallback {
        #[serde(flatten)]
        behavior: AlternateBehavior,
    },
    /// Accept a reduced-fidelity output and let downstream proceed.
    Degrade {
        #[serde(default)]
        value: Value,
    },
    /// Stop automatic recovery and surface the failure for a manual decision.
    Escalate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Run an optional compensating action, then fail the block. The
    /// action is a nested `action: { kind, properties }` object so that a
    /// malformed one is rejected instead of read as absent.
    Compensate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<AlternateBehavior>,
    },
}

fn default_max_attempts() -> u32 {
    3
}

impl RecoveryAction {
    pub fn strategy(&self) -> RecoveryStrategy {
        match self {
            RecoveryAction::None => RecoveryStrategy::None,
            RecoveryAction::Retry { .. } => RecoveryStrategy::Retry,
            RecoveryAction::Fallback { .. } => RecoveryStrategy::Fallback,
            RecoveryAction::Degrade { .. } => RecoveryStrategy::Degrade,
            RecoveryAction::Escalate { .. } => RecoveryStrategy::Escalate,
            RecoveryAction::Compensate { .. } => RecoveryStrategy::Compensate,
        }
    }
}

/// One configured step of a Recovery Path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStepConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub action: RecoveryAction,
}

impl RecoveryStepConfig {
    pub fn new(name: impl Into<String>, action: RecoveryAction) -> Self {
        Self {
            name: name.into(),
            description: None,
            action,
        }
    }

    pub fn retry(max_attempts: u32) -> Self {
        Self::new(
            "retry",
            RecoveryAction::Retry {
                max_attempts,
                backoff_ms: 0,
            },
        )
    }

    pub fn fallback(kind: BlockKind, properties: HashMap<String, Value>) -> Self {
        Self::new(
            "fallback",
            RecoveryAction::Fallback {
                behavior: AlternateBehavior { kind, properties },
            },
        )
    }

    pub fn degrade(value: Value) -> Self {
        Self::new("degrade", RecoveryAction::Degrade { value })
    }

    pub fn escalate(reason: impl Into<String>) -> Self {
        Self::new(
            "escalate",
            RecoveryAction::Escalate {
                reason: Some(reason.into()),
            },
        )
    }

    pub fn compensate(action: Option<AlternateBehavior>) -> Self {
        Self::new("compensate", RecoveryAction::Compensate { action })
    }

    pub fn strategy(&self) -> RecoveryStrategy {
        self.action.strategy()
    }
}

/// Default Recovery Paths keyed by the capability error kind that triggered
/// recovery. Consulted only for blocks without an explicit `recovery` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    #[serde(default)]
    pub paths: BTreeMap<CapabilityErrorKind, Vec<RecoveryStepConfig>>,
}

impl RecoveryPolicy {
    /// A policy with no default paths: every unconfigured failure is final.
    pub fn empty() -> Self {
        Self {
            paths: BTreeMap::new(),
        }
    }

    /// The default path for an error kind (empty when unmapped).
    pub fn path_for(&self, kind: CapabilityErrorKind) -> &[RecoveryStepConfig] {
        self.paths.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        let mut paths = BTreeMap::new();
        paths.insert(CapabilityErrorKind::Timeout, vec![RecoveryStepConfig::retry(3)]);
        paths.insert(CapabilityErrorKind::Provider, vec![RecoveryStepConfig::retry(3)]);
        paths.insert(
            CapabilityErrorKind::RateLimit,
            vec![RecoveryStepConfig::new(
                "retry-with-backoff",
                RecoveryAction::Retry {
                    max_attempts: 3,
                    backoff_ms: 500,
                },
            )],
        );
        paths.insert(
            CapabilityErrorKind::Auth,
            vec![RecoveryStepConfig::escalate("credentials rejected by provider")],
        );
        Self { paths }
    }
}

// ---------------------------------------------------------------------------
// Recovery execution records
// ---------------------------------------------------------------------------

/// Status of a single recovery step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// Runtime record of one step of a block's Recovery Path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub strategy: RecoveryStrategy,
    pub status: RecoveryStepStatus,
    /// Invocations performed by this step.
    pub attempts: u32,
    /// Last error captured while executing this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CapabilityError>,
    /// Wall-clock time spent executing this step.
    pub duration_ms: u64,
}

impl From<&RecoveryStepConfig> for RecoveryStep {
    fn from(config: &RecoveryStepConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            strategy: config.strategy(),
            status: RecoveryStepStatus::Pending,
            attempts: 0,
            error: None,
            duration_ms: 0,
        }
    }
}

/// State machine phase of a block's recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    Standby,
    Executing,
    Successful,
    Failed,
    Escalated,
}

impl RecoveryPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecoveryPhase::Successful | RecoveryPhase::Failed | RecoveryPhase::Escalated
        )
    }
}

/// Final outcome of a recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Successful,
    Failed,
    Escalated,
}

/// Aggregate over a block's Recovery Path.
///
/// `current_step` stays within `[0, steps.len()]`. Metrics are recomputed
/// from integer counters after every step transition, so `success_rate`
/// is always exactly `successful_attempts / total_attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryExecutionState {
    pub phase: RecoveryPhase,
    pub current_step: usize,
    pub steps: Vec<RecoveryStep>,
    pub total_attempts: u32,
    pub successful_attempts: u32,
    /// `None` until at least one attempt was made.
    pub success_rate: Option<f64>,
    pub total_recovery_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RecoveryOutcome>,
}

impl RecoveryExecutionState {
    /// Fresh state in `Standby` for the given path.
    pub fn new(path: &[RecoveryStepConfig]) -> Self {
        Self {
            phase: RecoveryPhase::Standby,
            current_step: 0,
            steps: path.iter().map(RecoveryStep::from).collect(),
            total_attempts: 0,
            successful_attempts: 0,
            success_rate: None,
            total_recovery_time_ms: 0,
            outcome: None,
        }
    }

    /// Length of the recovery path.
    pub fn path_len(&self) -> usize {
        self.steps.len()
    }

    /// Record one attempt on the current step.
    pub fn record_attempt(&mut self, succeeded: bool) {
        self.total_attempts += 1;
        if succeeded {
            self.successful_attempts += 1;
        }
        if let Some(step) = self.steps.get_mut(self.current_step) {
            step.attempts += 1;
        }
        self.recompute_metrics();
    }

    /// Move past the current step, clamped to the path length.
    pub fn advance(&mut self) {
        self.current_step = (self.current_step + 1).min(self.steps.len());
    }

    /// Recompute derived metrics from the counters and per-step durations.
    pub fn recompute_metrics(&mut self) {
        self.success_rate = if self.total_attempts == 0 {
            None
        } else {
            Some(self.successful_attempts as f64 / self.total_attempts as f64)
        };
        self.total_recovery_time_ms = self.steps.iter().map(|s| s.duration_ms).sum();
    }

    /// Enter a terminal phase and record the matching outcome.
    pub fn finish(&mut self, outcome: RecoveryOutcome) {
        self.phase = match outcome {
            RecoveryOutcome::Successful => RecoveryPhase::Successful,
            RecoveryOutcome::Failed => RecoveryPhase::Failed,
            RecoveryOutcome::Escalated => RecoveryPhase::Escalated,
        };
        self.outcome = Some(outcome);
        self.recompute_metrics();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_step_parses_with_defaults() {
        let step: RecoveryStepConfig = serde_json::from_value(json!({
            "name": "again",
            "strategy": "retry"
        }))
        .unwrap();
        match step.action {
            RecoveryAction::Retry {
                max_attempts,
                backoff_ms,
            } => {
                assert_eq!(max_attempts, 3);
                assert_eq!(backoff_ms, 0);
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn fallback_step_flattens_behavior() {
        let step: RecoveryStepConfig = serde_json::from_value(json!({
            "name": "cheap-model",
            "strategy": "fallback",
            "kind": "transform",
            "properties": { "operation": "constant", "value": "n/a" }
        }))
        .unwrap();
        assert_eq!(step.strategy(), RecoveryStrategy::Fallback);
        match step.action {
            RecoveryAction::Fallback { behavior } => {
                assert_eq!(behavior.kind, BlockKind::Transform);
                assert_eq!(behavior.properties["operation"], "constant");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn compensate_without_action() {
        let step: RecoveryStepConfig = serde_json::from_value(json!({
            "name": "undo",
            "strategy": "compensate"
        }))
        .unwrap();
        assert!(matches!(
            step.action,
            RecoveryAction::Compensate { action: None }
        ));
    }

    #[test]
    fn compensate_action_is_nested() {
        let step: RecoveryStepConfig = serde_json::from_value(json!({
            "name": "undo",
            "strategy": "compensate",
            "action": {
                "kind": "transform",
                "properties": { "operation": "constant", "value": "rolled back" }
            }
        }))
        .unwrap();
        match step.action {
            RecoveryAction::Compensate { action: Some(action) } => {
                assert_eq!(action.kind, BlockKind::Transform);
                assert_eq!(action.properties["value"], "rolled back");
            }
            other => panic!("expected compensate with action, got {other:?}"),
        }

        let json = serde_json::to_value(RecoveryStepConfig::compensate(None)).unwrap();
        assert_eq!(json, json!({ "name": "compensate", "strategy": "compensate" }));
    }

    #[test]
    fn malformed_compensate_action_is_rejected() {
        let missing_kind = serde_json::from_value::<RecoveryStepConfig>(json!({
            "name": "undo",
            "strategy": "compensate",
            "action": { "properties": { "operation": "constant" } }
        }));
        assert!(missing_kind.is_err());

        let not_an_object = serde_json::from_value::<RecoveryStepConfig>(json!({
            "name": "undo",
            "strategy": "compensate",
            "action": "transform"
        }));
        assert!(not_an_object.is_err());
    }

    #[test]
    fn success_rate_is_exact_ratio() {
        let mut state = RecoveryExecutionState::new(&[RecoveryStepConfig::retry(10)]);
        assert_eq!(state.success_rate, None);
        for _ in 0..6 {
            state.record_attempt(false);
        }
        state.record_attempt(true);
        // Recomputing repeatedly must not drift.
        for _ in 0..100 {
            state.recompute_metrics();
        }
        assert_eq!(state.total_attempts, 7);
        assert_eq!(state.success_rate, Some(1.0 / 7.0));
        assert_eq!(state.steps[0].attempts, 7);
    }

    #[test]
    fn advance_is_clamped_to_path_length() {
        let mut state = RecoveryExecutionState::new(&[RecoveryStepConfig::retry(1)]);
        state.advance();
        state.advance();
        assert_eq!(state.current_step, 1);
    }

    #[test]
    fn default_policy_maps_auth_to_escalate() {
        let policy = RecoveryPolicy::default();
        let path = policy.path_for(CapabilityErrorKind::Auth);
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].strategy(), RecoveryStrategy::Escalate);
        assert!(policy.path_for(CapabilityErrorKind::InvalidInput).is_empty());
    }

    #[test]
    fn finish_sets_phase_and_outcome() {
        let mut state = RecoveryExecutionState::new(&[]);
        state.finish(RecoveryOutcome::Escalated);
        assert_eq!(state.phase, RecoveryPhase::Escalated);
        assert!(state.phase.is_terminal());
        assert_eq!(state.outcome, Some(RecoveryOutcome::Escalated));
    }
}
