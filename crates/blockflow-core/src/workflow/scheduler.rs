//! Scheduler: dependency-driven dispatch of a validated graph.
//!
//! Blocks are dispatched as soon as every incoming connection's source has
//! reached a terminal status, up to `max_parallelism` at a time on a
//! `JoinSet`. Whether a dispatched block actually runs depends on which of
//! its incoming connections are satisfied:
//!
//! - data/control edges are satisfied when the source produced output
//! - conditional edges are satisfied when the source's `result` equals the branch
//! - failure-tolerant edges are also satisfied when the source failed or escalated
//!
//! Aggregators run when any incoming edge is satisfied; every other kind needs
//! all of them. A block that cannot run is recorded as skipped.
//!
//! Cancellation and the run deadline abort every in-flight task. Aborted
//! blocks that had started are recorded as failed with `cancelled`; blocks
//! that never started get no result, and the run ends `aborted`. A token
//! cancelled before the first poll ends the run without `RunStarted`.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blockflow_types::error::{CapabilityError, FailureReason};
use blockflow_types::event::TraceEventKind;
use blockflow_types::execution::{BlockResult, BlockStatus, RunStatus, RunSummary};
use blockflow_types::graph::{Block, BlockKind, Connection, ConnectionKind, WorkflowGraph};
use blockflow_types::recovery::RecoveryPolicy;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::context::ExecutionContext;
use super::dag::DependencyIndex;
use super::recovery::RecoveryController;
use super::runner::{BlockRunner, MergedInput};

/// Terminal status and output of a finished block, as seen by its dependents.
#[derive(Debug, Clone)]
struct Settled {
    status: BlockStatus,
    output: Option<Value>,
}

enum Eligibility {
    Run(MergedInput),
    Skip,
}

/// Runs one execution of a graph to completion.
pub struct Scheduler {
    graph: Arc<WorkflowGraph>,
    runner: Arc<BlockRunner>,
    policy: Arc<RecoveryPolicy>,
    ctx: ExecutionContext,
    max_parallelism: usize,
    run_timeout: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        graph: Arc<WorkflowGraph>,
        runner: Arc<BlockRunner>,
        policy: Arc<RecoveryPolicy>,
        ctx: ExecutionContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            graph,
            runner,
            policy,
            ctx,
            max_parallelism: 4,
            run_timeout: Duration::from_secs(1800),
            cancel,
        }
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism.max(1);
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Execute the graph and return the final summary. The context is
    /// finished before this returns.
    pub async fn run(self) -> RunSummary {
        let execution_id = self.ctx.execution_id();
        let index = match DependencyIndex::build(&self.graph) {
            Ok(index) => index,
            Err(e) => {
                tracing::error!(%execution_id, error = %e, "graph cannot be scheduled");
                return self.ctx.finish(RunStatus::Failed);
            }
        };

        if self.cancel.is_cancelled() {
            tracing::info!(%execution_id, "run cancelled before start");
            return self.ctx.finish(RunStatus::Aborted);
        }

        self.ctx.emit(TraceEventKind::RunStarted {
            workflow_name: self.ctx.workflow_name().to_string(),
            block_count: self.graph.blocks.len(),
        });
        tracing::info!(
            %execution_id,
            workflow = self.ctx.workflow_name(),
            blocks = self.graph.blocks.len(),
            max_parallelism = self.max_parallelism,
            "run started"
        );

        let mut remaining = index.in_degrees();
        let mut ready: VecDeque<String> = index
            .block_ids()
            .iter()
            .filter(|id| remaining.get(id.as_str()) == Some(&0))
            .cloned()
            .collect();
        let mut settled: HashMap<String, Settled> = HashMap::new();
        let mut in_flight: Vec<(String, DateTime<Utc>)> = Vec::new();
        let mut join_set: JoinSet<BlockResult> = JoinSet::new();

        let deadline = tokio::time::sleep(self.run_timeout);
        tokio::pin!(deadline);
        let mut aborted = false;

        loop {
            while !self.cancel.is_cancelled() && join_set.len() < self.max_parallelism {
                let Some(block_id) = ready.pop_front() else {
                    break;
                };
                let Some(block) = self.graph.block(&block_id) else {
                    continue;
                };

                match self.eligibility(block, &index, &settled) {
                    Eligibility::Skip => {
                        tracing::debug!(%execution_id, block_id = block_id.as_str(), "block skipped");
                        self.ctx.record_result(BlockResult::skipped(&block_id));
                        self.settle(
                            &block_id,
                            BlockStatus::Skipped,
                            None,
                            &index,
                            &mut settled,
                            &mut remaining,
                            &mut ready,
                        );
                    }
                    Eligibility::Run(input) => {
                        in_flight.push((block_id.clone(), Utc::now()));
                        join_set.spawn(execute_block(
                            Arc::clone(&self.runner),
                            Arc::clone(&self.policy),
                            self.ctx.clone(),
                            block.clone(),
                            input,
                        ));
                    }
                }
            }

            if join_set.is_empty() {
                // Dispatch stopped on cancellation with work still queued.
                aborted = self.cancel.is_cancelled() && !ready.is_empty();
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::info!(%execution_id, "run cancelled");
                    aborted = true;
                    break;
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        %execution_id,
                        timeout_secs = self.run_timeout.as_secs(),
                        "run timed out"
                    );
                    aborted = true;
                    break;
                }
                Some(joined) = join_set.join_next() => {
                    // Tasks catch their own panics, so a join error here is an abort.
                    if let Ok(result) = joined {
                        in_flight.retain(|(id, _)| *id != result.block_id);
                        let (block_id, status, output) =
                            (result.block_id.clone(), result.status, result.output.clone());
                        self.ctx.record_result(result);
                        self.settle(
                            &block_id,
                            status,
                            output,
                            &index,
                            &mut settled,
                            &mut remaining,
                            &mut ready,
                        );
                    }
                }
            }
        }

        if aborted {
            join_set.abort_all();
            while let Some(joined) = join_set.join_next().await {
                // A task may have finished between the signal and the abort.
                if let Ok(result) = joined {
                    in_flight.retain(|(id, _)| *id != result.block_id);
                    self.ctx.record_result(result);
                }
            }
            for (block_id, started_at) in in_flight {
                if self.ctx.block_started(&block_id) {
                    self.ctx.record_result(cancelled_result(block_id, started_at));
                }
            }
            let summary = self.ctx.finish(RunStatus::Aborted);
            tracing::info!(%execution_id, status = %summary.status, "run finished");
            return summary;
        }

        let status = self.final_status(&index, &settled);
        let summary = self.ctx.finish(status);
        tracing::info!(
            %execution_id,
            status = %summary.status,
            elapsed_ms = summary.elapsed_ms(),
            "run finished"
        );
        summary
    }

    /// Record that `block_id` settled and release dependents whose
    /// in-degree reaches zero, in connection order.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        block_id: &str,
        status: BlockStatus,
        output: Option<Value>,
        index: &DependencyIndex,
        settled: &mut HashMap<String, Settled>,
        remaining: &mut HashMap<String, usize>,
        ready: &mut VecDeque<String>,
    ) {
        settled.insert(block_id.to_string(), Settled { status, output });
        for conn in index.outgoing(block_id) {
            if let Some(deg) = remaining.get_mut(&conn.target) {
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    ready.push_back(conn.target.clone());
                }
            }
        }
    }

    fn eligibility(
        &self,
        block: &Block,
        index: &DependencyIndex,
        settled: &HashMap<String, Settled>,
    ) -> Eligibility {
        let incoming = index.incoming(&block.id);
        let mut input = MergedInput::new(self.ctx.input().clone());
        if incoming.is_empty() {
            return Eligibility::Run(input);
        }

        let mut any = false;
        let mut all = true;
        for conn in incoming {
            let Some(source) = settled.get(&conn.source) else {
                all = false;
                continue;
            };
            if edge_satisfied(conn, source) {
                any = true;
                if conn.carries_data() {
                    if let Some(output) = &source.output {
                        input.push_upstream(&conn.source, output.clone());
                    }
                }
            } else {
                all = false;
            }
        }

        let runs = match block.kind {
            BlockKind::Aggregator => any,
            _ => all,
        };
        if runs {
            Eligibility::Run(input)
        } else {
            Eligibility::Skip
        }
    }

    /// `failed` when a block escalated, or failed without a tolerant
    /// downstream edge that carried the run past it; `completed` otherwise.
    fn final_status(&self, index: &DependencyIndex, settled: &HashMap<String, Settled>) -> RunStatus {
        let unabsorbed_failure = settled.iter().any(|(id, s)| match s.status {
            BlockStatus::Escalated => true,
            BlockStatus::Failed => !index.outgoing(id).iter().any(|conn| {
                conn.tolerate_failure
                    && settled
                        .get(&conn.target)
                        .is_some_and(|t| t.status.produced_output())
            }),
            _ => false,
        });
        if unabsorbed_failure {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        }
    }
}

fn edge_satisfied(conn: &Connection, source: &Settled) -> bool {
    match &conn.kind {
        ConnectionKind::Conditional { branch } => {
            source.status.produced_output()
                && source
                    .output
                    .as_ref()
                    .and_then(|o| o.get("result"))
                    .and_then(Value::as_bool)
                    == Some(*branch)
        }
        ConnectionKind::DataFlow | ConnectionKind::ControlFlow => {
            source.status.produced_output()
                || (conn.tolerate_failure
                    && matches!(source.status, BlockStatus::Failed | BlockStatus::Escalated))
        }
    }
}

fn cancelled_result(block_id: String, started_at: DateTime<Utc>) -> BlockResult {
    let completed_at = Utc::now();
    BlockResult {
        block_id,
        status: BlockStatus::Failed,
        output: None,
        error: Some(FailureReason::Cancelled),
        started_at,
        completed_at,
        attempts: 0,
        degraded: false,
        compensated: false,
        recovery: None,
        duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
    }
}

/// One block: initial attempt, then recovery if it failed.
async fn execute_block(
    runner: Arc<BlockRunner>,
    policy: Arc<RecoveryPolicy>,
    ctx: ExecutionContext,
    block: Block,
    input: MergedInput,
) -> BlockResult {
    let started_at = Utc::now();
    let start = Instant::now();

    let attempt = AssertUnwindSafe(async {
        match runner.run(&block, &input, 1, &ctx).await {
            Ok(output) => BlockResult {
                block_id: block.id.clone(),
                status: BlockStatus::Succeeded,
                output: Some(output),
                error: None,
                started_at,
                completed_at: started_at,
                attempts: 1,
                degraded: false,
                compensated: false,
                recovery: None,
                duration_ms: 0,
            },
            Err(error) => {
                let res = RecoveryController::new(&runner, &ctx, &policy)
                    .recover(&block, &input, error, 1)
                    .await;
                BlockResult {
                    block_id: block.id.clone(),
                    status: res.status,
                    output: res.output,
                    error: res.error,
                    started_at,
                    completed_at: started_at,
                    attempts: 1 + res.attempts,
                    degraded: res.degraded,
                    compensated: res.compensated,
                    recovery: (res.state.path_len() > 0).then_some(res.state),
                    duration_ms: 0,
                }
            }
        }
    })
    .catch_unwind()
    .await;

    let mut result = match attempt {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(block_id = block.id.as_str(), "block task panicked");
            BlockResult {
                block_id: block.id.clone(),
                status: BlockStatus::Failed,
                output: None,
                error: Some(CapabilityError::provider("block execution panicked").into()),
                started_at,
                completed_at: started_at,
                attempts: 1,
                degraded: false,
                compensated: false,
                recovery: None,
                duration_ms: 0,
            }
        }
    };
    result.completed_at = Utc::now();
    result.duration_ms = start.elapsed().as_millis() as u64;
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::capability::box_provider::BoxCapabilityProvider;
    use crate::capability::provider::CapabilityProvider;
    use blockflow_types::capability::{CapabilityRequest, CapabilityResponse};
    use blockflow_types::graph::WorkflowMetadata;
    use serde_json::json;
    use uuid::Uuid;

    /// Cancels the run from inside the first call it receives.
    #[derive(Clone)]
    struct CancelOnCall {
        token: CancellationToken,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl CapabilityProvider for CancelOnCall {
        fn name(&self) -> &str {
            "cancel-on-call"
        }

        fn supports(&self, _capability: &str) -> bool {
            true
        }

        async fn invoke(
            &self,
            request: &CapabilityRequest,
        ) -> Result<CapabilityResponse, CapabilityError> {
            self.log.lock().unwrap().push(request.block_id.clone());
            self.token.cancel();
            Ok(CapabilityResponse::text(format!("{} ok", request.block_id)))
        }
    }

    fn scheduler(
        blocks: &[&str],
        edges: &[(&str, &str)],
        token: CancellationToken,
    ) -> (Scheduler, ExecutionContext, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let provider = CancelOnCall {
            token: token.clone(),
            log: Arc::clone(&log),
        };
        let graph = WorkflowGraph {
            id: Uuid::now_v7(),
            metadata: WorkflowMetadata::named("scheduler-test"),
            blocks: blocks
                .iter()
                .map(|id| {
                    Block::new(*id, BlockKind::ModelCall)
                        .with_property("prompt", json!(format!("run {id}")))
                })
                .collect(),
            connections: edges.iter().map(|(s, t)| Connection::data(*s, *t)).collect(),
        };
        let runner = BlockRunner::new(
            Arc::new(BoxCapabilityProvider::new(provider)),
            Duration::from_secs(5),
        );
        let ctx = ExecutionContext::new(Uuid::now_v7(), "scheduler-test", json!({}), 64);
        let scheduler = Scheduler::new(
            Arc::new(graph),
            Arc::new(runner),
            Arc::new(RecoveryPolicy::empty()),
            ctx.clone(),
            token,
        );
        (scheduler, ctx, log)
    }

    #[tokio::test]
    async fn cancelled_token_ends_run_without_starting() {
        let token = CancellationToken::new();
        let (scheduler, ctx, log) = scheduler(&["a", "b"], &[("a", "b")], token.clone());
        token.cancel();

        let summary = scheduler.run().await;

        assert_eq!(summary.status, RunStatus::Aborted);
        assert!(summary.block_results.is_empty());
        assert!(log.lock().unwrap().is_empty());
        let events = ctx.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_of_dependents() {
        let token = CancellationToken::new();
        let (scheduler, ctx, log) =
            scheduler(&["a", "b", "c"], &[("a", "b"), ("a", "c")], token);

        let summary = scheduler.run().await;

        assert_eq!(summary.status, RunStatus::Aborted);
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string()]);
        // a finished before the signal was observed, so it keeps its result.
        assert_eq!(summary.result("a").unwrap().status, BlockStatus::Succeeded);
        assert!(summary.result("b").is_none());
        assert!(summary.result("c").is_none());
        assert!(!ctx.block_started("b"));
        assert!(!ctx.block_started("c"));
    }

    #[tokio::test]
    async fn queued_roots_are_not_dispatched_after_cancellation() {
        let token = CancellationToken::new();
        let (scheduler, _ctx, log) = scheduler(&["a", "b"], &[], token);

        let summary = scheduler.with_max_parallelism(1).run().await;

        assert_eq!(summary.status, RunStatus::Aborted);
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string()]);
        assert!(summary.result("b").is_none());
    }
}
