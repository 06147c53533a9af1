//! Recovery controller: walks a failed block's Recovery Path.
//!
//! The path is the block's explicit `recovery` list, or the policy's default
//! path for the error kind that triggered recovery. Steps run strictly in
//! order. Each step transition is published to the trace and folded into a
//! `RecoveryExecutionState`, whose metrics are recomputed after every step.
//!
//! Attempt accounting:
//! - `none` is skipped without consuming an attempt
//! - `retry` consumes one attempt per re-invocation
//! - `fallback` consumes one attempt
//! - `degrade` is recorded as one successful attempt
//! - `escalate` consumes no attempt
//! - `compensate` consumes one attempt when it carries an action

use std::time::{Duration, Instant};

use blockflow_types::error::{CapabilityError, FailureReason};
use blockflow_types::execution::BlockStatus;
use blockflow_types::graph::Block;
use blockflow_types::recovery::{
    RecoveryAction, RecoveryExecutionState, RecoveryOutcome, RecoveryPhase, RecoveryPolicy,
    RecoveryStepConfig, RecoveryStepStatus,
};
use serde_json::Value;

use super::context::ExecutionContext;
use super::runner::{BlockRunner, MergedInput};

/// How a block's recovery ended.
#[derive(Debug, Clone)]
pub struct RecoveryResolution {
    /// `Recovered`, `Failed`, or `Escalated`.
    pub status: BlockStatus,
    pub output: Option<Value>,
    pub error: Option<FailureReason>,
    /// Invocations of the block or its fallback made during recovery.
    /// Compensating actions are not counted.
    pub attempts: u32,
    pub degraded: bool,
    pub compensated: bool,
    pub state: RecoveryExecutionState,
}

/// Result of a single step.
enum StepOutcome {
    Recovered { output: Value, degraded: bool },
    Escalated { reason: String },
    Compensated,
    /// The step did not resolve the failure; move to the next one.
    Continue,
}

/// Drives recovery for one block. Borrowed per block from the scheduler task.
pub struct RecoveryController<'a> {
    runner: &'a BlockRunner,
    ctx: &'a ExecutionContext,
    policy: &'a RecoveryPolicy,
}

impl<'a> RecoveryController<'a> {
    pub fn new(
        runner: &'a BlockRunner,
        ctx: &'a ExecutionContext,
        policy: &'a RecoveryPolicy,
    ) -> Self {
        Self {
            runner,
            ctx,
            policy,
        }
    }

    /// The Recovery Path that applies to `block` for a failure of `error`'s kind.
    pub fn path_for<'b>(&'b self, block: &'b Block, error: &CapabilityError) -> &'b [RecoveryStepConfig] {
        match &block.recovery {
            Some(path) => path,
            None => self.policy.path_for(error.kind),
        }
    }

    /// Recover `block` after its initial run failed with `error`.
    ///
    /// `attempts_so_far` is the number of invocations already made, used to
    /// number the attempts published to the trace.
    pub async fn recover(
        &self,
        block: &Block,
        input: &MergedInput,
        error: CapabilityError,
        attempts_so_far: u32,
    ) -> RecoveryResolution {
        let path = self.path_for(block, &error);
        let mut state = RecoveryExecutionState::new(path);

        if path.is_empty() {
            state.finish(RecoveryOutcome::Failed);
            return RecoveryResolution {
                status: BlockStatus::Failed,
                output: None,
                error: Some(FailureReason::Capability(error)),
                attempts: 0,
                degraded: false,
                compensated: false,
                state,
            };
        }

        tracing::debug!(
            execution_id = %self.ctx.execution_id(),
            block_id = block.id.as_str(),
            error_kind = %error.kind,
            steps = path.len(),
            "entering recovery"
        );

        state.phase = RecoveryPhase::Executing;
        let mut last_error = error;
        let mut attempt = attempts_so_far;
        let mut resolved = None;

        for (index, step) in path.iter().enumerate() {
            state.current_step = index;
            let step_start = Instant::now();

            // A placeholder step publishes one completed transition and
            // consumes no attempt.
            if let RecoveryAction::None = step.action {
                state.steps[index].status = RecoveryStepStatus::Completed;
                self.ctx.emit_recovery(
                    &block.id,
                    index,
                    &step.name,
                    step.strategy(),
                    RecoveryStepStatus::Completed,
                    attempt,
                );
                state.advance();
                continue;
            }

            state.steps[index].status = RecoveryStepStatus::Executing;
            self.ctx.emit_recovery(
                &block.id,
                index,
                &step.name,
                step.strategy(),
                RecoveryStepStatus::Executing,
                attempt,
            );

            let outcome = self
                .run_step(block, input, step, &mut state, &mut attempt, &mut last_error)
                .await;

            let step_status = match outcome {
                StepOutcome::Continue => RecoveryStepStatus::Failed,
                _ if state.steps[index].error.is_some()
                    && matches!(step.action, RecoveryAction::Compensate { .. }) =>
                {
                    RecoveryStepStatus::Failed
                }
                _ => RecoveryStepStatus::Completed,
            };
            let record = &mut state.steps[index];
            record.status = step_status;
            record.duration_ms = step_start.elapsed().as_millis() as u64;
            state.recompute_metrics();

            self.ctx.emit_recovery(
                &block.id,
                index,
                &step.name,
                step.strategy(),
                step_status,
                attempt,
            );
            state.advance();

            if !matches!(outcome, StepOutcome::Continue) {
                resolved = Some(outcome);
                break;
            }
        }

        let attempts = attempt - attempts_so_far;
        let mut resolution = RecoveryResolution {
            status: BlockStatus::Failed,
            output: None,
            error: None,
            attempts,
            degraded: false,
            compensated: false,
            state,
        };

        match resolved {
            Some(StepOutcome::Recovered { output, degraded }) => {
                resolution.state.finish(RecoveryOutcome::Successful);
                resolution.status = BlockStatus::Recovered;
                resolution.output = Some(output);
                resolution.degraded = degraded;
                tracing::info!(
                    block_id = block.id.as_str(),
                    attempts,
                    degraded,
                    "block recovered"
                );
            }
            Some(StepOutcome::Escalated { reason }) => {
                resolution.state.finish(RecoveryOutcome::Escalated);
                resolution.status = BlockStatus::Escalated;
                tracing::warn!(
                    execution_id = %self.ctx.execution_id(),
                    block_id = block.id.as_str(),
                    reason = reason.as_str(),
                    "recovery escalated"
                );
                resolution.error = Some(FailureReason::Escalated { reason });
            }
            Some(StepOutcome::Compensated) => {
                resolution.state.finish(RecoveryOutcome::Failed);
                resolution.compensated = true;
                tracing::warn!(
                    execution_id = %self.ctx.execution_id(),
                    block_id = block.id.as_str(),
                    error = %last_error,
                    "block failed after compensation"
                );
                resolution.error = Some(FailureReason::Compensated { last_error });
            }
            Some(StepOutcome::Continue) | None => {
                resolution.state.finish(RecoveryOutcome::Failed);
                let total = resolution.state.total_attempts;
                tracing::warn!(
                    execution_id = %self.ctx.execution_id(),
                    block_id = block.id.as_str(),
                    attempts = total,
                    error = %last_error,
                    "recovery exhausted"
                );
                resolution.error = Some(FailureReason::RecoveryExhausted {
                    attempts: total,
                    last_error,
                });
            }
        }

        resolution
    }

    async fn run_step(
        &self,
        block: &Block,
        input: &MergedInput,
        step: &RecoveryStepConfig,
        state: &mut RecoveryExecutionState,
        attempt: &mut u32,
        last_error: &mut CapabilityError,
    ) -> StepOutcome {
        let index = state.current_step;
        match &step.action {
            RecoveryAction::None => StepOutcome::Continue,

            RecoveryAction::Retry {
                max_attempts,
                backoff_ms,
            } => {
                for _ in 0..*max_attempts {
                    if *backoff_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
                    }
                    *attempt += 1;
                    match self.runner.run(block, input, *attempt, self.ctx).await {
                        Ok(output) => {
                            state.record_attempt(true);
                            return StepOutcome::Recovered {
                                output,
                                degraded: false,
                            };
                        }
                        Err(e) => {
                            state.record_attempt(false);
                            state.steps[index].error = Some(e.clone());
                            *last_error = e;
                        }
                    }
                }
                StepOutcome::Continue
            }

            RecoveryAction::Fallback { behavior } => {
                *attempt += 1;
                match self
                    .runner
                    .run_alternate(&block.id, behavior, input, *attempt, self.ctx)
                    .await
                {
                    Ok(output) => {
                        state.record_attempt(true);
                        StepOutcome::Recovered {
                            output,
                            degraded: false,
                        }
                    }
                    Err(e) => {
                        state.record_attempt(false);
                        state.steps[index].error = Some(e.clone());
                        *last_error = e;
                        StepOutcome::Continue
                    }
                }
            }

            RecoveryAction::Degrade { value } => {
                state.record_attempt(true);
                StepOutcome::Recovered {
                    output: value.clone(),
                    degraded: true,
                }
            }

            RecoveryAction::Escalate { reason } => StepOutcome::Escalated {
                reason: reason.clone().unwrap_or_else(|| last_error.to_string()),
            },

            RecoveryAction::Compensate { action } => {
                if let Some(behavior) = action {
                    // Numbered after the last counted attempt but not counted itself.
                    let result = self
                        .runner
                        .run_alternate(&block.id, behavior, input, *attempt + 1, self.ctx)
                        .await;
                    state.record_attempt(result.is_ok());
                    if let Err(e) = result {
                        tracing::warn!(
                            block_id = block.id.as_str(),
                            error = %e,
                            "compensating action failed"
                        );
                        state.steps[index].error = Some(e);
                    }
                }
                StepOutcome::Compensated
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
