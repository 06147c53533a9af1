//! Execution engine: starts, tracks, and cancels runs.
//!
//! `ExecutionEngine` validates a graph synchronously, registers the run
//! under a fresh UUIDv7 execution id, and spawns its scheduler on tokio.
//! Cancellation tokens live in a `DashMap` keyed by execution id and are
//! removed when the run ends, so cancelling a finished run reports
//! `ExecutionNotFound`. Finished runs stay queryable until more than
//! `retained_runs` newer runs have finished.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blockflow_types::config::EngineConfig;
use blockflow_types::error::ValidationReport;
use blockflow_types::event::TraceEvent;
use blockflow_types::execution::{RunStatus, RunSummary};
use blockflow_types::graph::WorkflowGraph;
use dashmap::DashMap;
use futures_util::Stream;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capability::box_provider::BoxCapabilityProvider;

use super::context::ExecutionContext;
use super::runner::BlockRunner;
use super::scheduler::Scheduler;
use super::validate::validate;

/// Errors surfaced by the engine's public operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The graph failed validation; nothing was scheduled.
    #[error(transparent)]
    Validation(#[from] ValidationReport),

    /// Unknown, evicted, or (for cancel) already-finished execution.
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// The run's supervising task could not be joined.
    #[error("execution task failed: {0}")]
    TaskFailed(String),
}

/// Handle to a started run.
pub struct ExecutionHandle {
    execution_id: Uuid,
    context: ExecutionContext,
    join: JoinHandle<RunSummary>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Finite stream of the run's trace events, from the first one.
    pub fn subscribe(&self) -> impl Stream<Item = TraceEvent> + Send + 'static + use<> {
        self.context.subscribe()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> Result<RunSummary, EngineError> {
        self.join
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}

/// Runs workflow graphs against a capability provider.
pub struct ExecutionEngine {
    config: Arc<EngineConfig>,
    runner: Arc<BlockRunner>,
    /// Cancellation tokens of live runs, keyed by execution id.
    cancellations: Arc<DashMap<Uuid, CancellationToken>>,
    /// Live and retained runs.
    contexts: Arc<DashMap<Uuid, ExecutionContext>>,
    /// Finished runs, oldest first.
    retained: Arc<Mutex<VecDeque<Uuid>>>,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig, provider: BoxCapabilityProvider) -> Self {
        let runner = BlockRunner::new(
            Arc::new(provider),
            Duration::from_secs(config.block_timeout_secs),
        );
        Self {
            config: Arc::new(config),
            runner: Arc::new(runner),
            cancellations: Arc::new(DashMap::new()),
            contexts: Arc::new(DashMap::new()),
            retained: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate `graph` and start executing it with `input` as the initial
    /// input bag. Must be called from within a tokio runtime.
    pub fn start_execution(
        &self,
        graph: WorkflowGraph,
        input: Value,
    ) -> Result<ExecutionHandle, EngineError> {
        let report = validate(&graph);
        if !report.is_valid() {
            tracing::debug!(
                workflow = graph.metadata.name.as_str(),
                violations = report.violations.len(),
                "graph rejected"
            );
            return Err(EngineError::Validation(report));
        }

        let execution_id = Uuid::now_v7();
        let ctx = ExecutionContext::new(
            execution_id,
            graph.metadata.name.clone(),
            input,
            self.config.event_capacity,
        );
        let token = CancellationToken::new();
        self.cancellations.insert(execution_id, token.clone());
        self.contexts.insert(execution_id, ctx.clone());

        let scheduler = Scheduler::new(
            Arc::new(graph),
            Arc::clone(&self.runner),
            Arc::new(self.config.recovery_policy.clone()),
            ctx.clone(),
            token,
        )
        .with_max_parallelism(self.config.max_parallelism)
        .with_run_timeout(Duration::from_secs(self.config.run_timeout_secs));

        let cancellations = Arc::clone(&self.cancellations);
        let contexts = Arc::clone(&self.contexts);
        let retained = Arc::clone(&self.retained);
        let retained_runs = self.config.retained_runs;
        let supervised_ctx = ctx.clone();

        let join = tokio::spawn(async move {
            let summary = match tokio::spawn(scheduler.run()).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(%execution_id, error = %e, "scheduler task failed");
                    supervised_ctx.finish(RunStatus::Failed)
                }
            };

            cancellations.remove(&execution_id);
            let mut finished = retained.lock().expect("retained runs lock poisoned");
            finished.push_back(execution_id);
            while finished.len() > retained_runs {
                if let Some(evicted) = finished.pop_front() {
                    contexts.remove(&evicted);
                }
            }
            summary
        });

        Ok(ExecutionHandle {
            execution_id,
            context: ctx,
            join,
        })
    }

    /// Trigger cancellation of a live run.
    pub fn cancel_execution(&self, execution_id: Uuid) -> Result<(), EngineError> {
        match self.cancellations.remove(&execution_id) {
            Some((_, token)) => {
                token.cancel();
                tracing::info!(%execution_id, "execution cancellation requested");
                Ok(())
            }
            None => Err(EngineError::ExecutionNotFound(execution_id)),
        }
    }

    /// Current summary of a live or retained run.
    pub fn summary(&self, execution_id: Uuid) -> Result<RunSummary, EngineError> {
        self.contexts
            .get(&execution_id)
            .map(|ctx| ctx.summary())
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    /// Trace stream of a live or retained run, replayed from the start.
    pub fn subscribe(
        &self,
        execution_id: Uuid,
    ) -> Result<impl Stream<Item = TraceEvent> + Send + 'static + use<>, EngineError> {
        self.contexts
            .get(&execution_id)
            .map(|ctx| ctx.subscribe())
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    /// Number of live runs that have not been cancelled.
    pub fn active_executions(&self) -> usize {
        self.cancellations.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
