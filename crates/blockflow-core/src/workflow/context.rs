//! Execution context: the append-only record of one run.
//!
//! `ExecutionContext` holds the initial input, the ordered block results,
//! and the full trace log of a run. It is the only mutable state shared
//! between the scheduler, the runner, the recovery controller, and observers.
//!
//! Every mutation goes through `emit`/`record_result`/`finish`, which take
//! a single lock, assign the next sequence number, append to the log, and
//! broadcast. Subscribers replay the log and then follow the bus, so they
//! see every event exactly once and in order. After `finish` the context is
//! closed: further emits are dropped.

use std::sync::{Arc, Mutex};

use blockflow_types::error::FailureReason;
use blockflow_types::event::{TraceEvent, TraceEventKind};
use blockflow_types::execution::{BlockResult, BlockStatus, RunStatus, RunSummary};
use blockflow_types::recovery::{RecoveryStepStatus, RecoveryStrategy};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::event::bus::TraceBus;

/// Shared handle to one run's record. Cloning shares the same record.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    execution_id: Uuid,
    workflow_name: String,
    input: Value,
    started_at: DateTime<Utc>,
    bus: TraceBus,
    state: Mutex<ContextState>,
}

struct ContextState {
    status: RunStatus,
    completed_at: Option<DateTime<Utc>>,
    results: Vec<BlockResult>,
    events: Vec<TraceEvent>,
}

impl ExecutionContext {
    /// Create the context for a new run.
    pub fn new(
        execution_id: Uuid,
        workflow_name: impl Into<String>,
        input: Value,
        event_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                execution_id,
                workflow_name: workflow_name.into(),
                input,
                started_at: Utc::now(),
                bus: TraceBus::new(event_capacity),
                state: Mutex::new(ContextState {
                    status: RunStatus::Running,
                    completed_at: None,
                    results: Vec::new(),
                    events: Vec::new(),
                }),
            }),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.inner.execution_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.inner.workflow_name
    }

    /// The run's initial input bag.
    pub fn input(&self) -> &Value {
        &self.inner.input
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ContextState> {
        self.inner.state.lock().expect("execution context lock poisoned")
    }

    // -- Appends ------------------------------------------------------------

    /// Append an event to the trace. Returns its sequence number, or `None`
    /// if the run already finished.
    pub fn emit(&self, kind: TraceEventKind) -> Option<u64> {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return None;
        }
        Some(self.append_locked(&mut state, kind))
    }

    fn append_locked(&self, state: &mut ContextState, kind: TraceEventKind) -> u64 {
        let seq = state.events.len() as u64;
        let event = TraceEvent {
            execution_id: self.inner.execution_id,
            seq,
            timestamp: Utc::now(),
            kind,
        };
        state.events.push(event.clone());
        self.inner.bus.publish(event);
        seq
    }

    /// Publish a single-invocation transition for a block.
    pub fn emit_block(
        &self,
        block_id: &str,
        status: BlockStatus,
        attempt: u32,
        error: Option<FailureReason>,
        duration_ms: u64,
    ) {
        self.emit(TraceEventKind::Block {
            block_id: block_id.to_string(),
            status,
            attempt,
            error,
            duration_ms,
        });
    }

    /// Publish a recovery step transition.
    pub fn emit_recovery(
        &self,
        block_id: &str,
        step_index: usize,
        step_name: &str,
        strategy: RecoveryStrategy,
        status: RecoveryStepStatus,
        attempt: u32,
    ) {
        self.emit(TraceEventKind::Recovery {
            block_id: block_id.to_string(),
            step_index,
            step_name: step_name.to_string(),
            strategy,
            status,
            attempt,
        });
    }

    /// Append a block's terminal result.
    ///
    /// Results are never replaced: a second result for the same block, or
    /// any result after the run finished, is dropped and `false` returned.
    pub fn record_result(&self, result: BlockResult) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return false;
        }
        if state.results.iter().any(|r| r.block_id == result.block_id) {
            tracing::warn!(
                execution_id = %self.inner.execution_id,
                block_id = result.block_id.as_str(),
                "ignoring duplicate block result"
            );
            return false;
        }
        state.results.push(result.clone());
        self.append_locked(&mut state, TraceEventKind::BlockFinished { result });
        true
    }

    /// Move the run to its terminal status, publish the final event, and
    /// close the trace. Idempotent: later calls return the existing summary.
    pub fn finish(&self, status: RunStatus) -> RunSummary {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return self.summary_locked(&state);
        }
        state.status = status;
        state.completed_at = Some(Utc::now());
        let summary = self.summary_locked(&state);
        self.append_locked(
            &mut state,
            TraceEventKind::RunFinished {
                summary: summary.clone(),
            },
        );
        summary
    }

    // -- Reads --------------------------------------------------------------

    /// Snapshot of the recorded block results, in record order.
    pub fn results(&self) -> Vec<BlockResult> {
        self.lock().results.clone()
    }

    pub fn result(&self, block_id: &str) -> Option<BlockResult> {
        self.lock()
            .results
            .iter()
            .find(|r| r.block_id == block_id)
            .cloned()
    }

    /// Whether `block_id` has emitted its first `running` transition.
    pub fn block_started(&self, block_id: &str) -> bool {
        self.lock().events.iter().any(|e| {
            matches!(
                &e.kind,
                TraceEventKind::Block { block_id: id, status: BlockStatus::Running, .. } if id == block_id
            )
        })
    }

    /// Snapshot of the trace log.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.lock().events.clone()
    }

    fn events_since(&self, seq: u64) -> Vec<TraceEvent> {
        let state = self.lock();
        state.events.iter().skip(seq as usize).cloned().collect()
    }

    /// Current summary; partial while the run is live.
    pub fn summary(&self) -> RunSummary {
        let state = self.lock();
        self.summary_locked(&state)
    }

    fn summary_locked(&self, state: &ContextState) -> RunSummary {
        RunSummary::new(
            self.inner.execution_id,
            self.inner.workflow_name.clone(),
            state.status,
            self.inner.started_at,
            state.completed_at,
            state.results.clone(),
        )
    }

    /// Finite stream of every trace event of this run.
    ///
    /// Replays what was already published, then follows live events, and
    /// ends right after the `RunFinished` event. A subscriber that falls
    /// behind the broadcast buffer catches up from the log.
    pub fn subscribe(&self) -> impl Stream<Item = TraceEvent> + Send + 'static + use<> {
        // Snapshot and receiver are taken under the same lock so no event
        // falls between them.
        let (backlog, mut rx) = {
            let state = self.lock();
            (state.events.clone(), self.inner.bus.subscribe())
        };
        let ctx = self.clone();

        async_stream::stream! {
            let mut next_seq = 0u64;
            for event in backlog {
                next_seq = event.seq + 1;
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }

            loop {
                let batch = match rx.recv().await {
                    Ok(event) if event.seq < next_seq => continue,
                    Ok(event) if event.seq == next_seq => vec![event],
                    // Gap (lagged or reordered): fill from the log.
                    Ok(_) | Err(RecvError::Lagged(_)) | Err(RecvError::Closed) => {
                        ctx.events_since(next_seq)
                    }
                };
                if batch.is_empty() {
                    // Closed with nothing left to read.
                    return;
                }
                for event in batch {
                    next_seq = event.seq + 1;
                    let terminal = event.is_terminal();
                    yield event;
                    if terminal {
                        return;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution_id", &self.inner.execution_id)
            .field("workflow_name", &self.inner.workflow_name)
            .field("status", &self.status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::new(Uuid::now_v7(), "ctx-test", json!({ "topic": "rust" }), 16)
    }

    fn succeeded(id: &str) -> BlockResult {
        BlockResult {
            status: BlockStatus::Succeeded,
            output: Some(json!("ok")),
            attempts: 1,
            ..BlockResult::skipped(id)
        }
    }

    #[test]
    fn sequence_numbers_are_dense() {
        let ctx = context();
        ctx.emit(TraceEventKind::RunStarted {
            workflow_name: "ctx-test".to_string(),
            block_count: 1,
        });
        ctx.emit_block("a", BlockStatus::Running, 1, None, 0);
        ctx.record_result(succeeded("a"));
        let seqs: Vec<u64> = ctx.events().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn block_started_tracks_running_transitions() {
        let ctx = context();
        assert!(!ctx.block_started("a"));
        ctx.emit_block("b", BlockStatus::Running, 1, None, 0);
        assert!(!ctx.block_started("a"));
        ctx.emit_block("a", BlockStatus::Running, 1, None, 0);
        assert!(ctx.block_started("a"));
        assert!(ctx.block_started("b"));
    }

    #[test]
    fn results_are_append_only() {
        let ctx = context();
        assert!(ctx.record_result(succeeded("a")));
        assert!(!ctx.record_result(BlockResult::skipped("a")));
        assert_eq!(ctx.results().len(), 1);
        assert_eq!(ctx.result("a").unwrap().status, BlockStatus::Succeeded);
    }

    #[test]
    fn finish_closes_the_trace() {
        let ctx = context();
        ctx.record_result(succeeded("a"));
        let summary = ctx.finish(RunStatus::Completed);
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.count(BlockStatus::Succeeded), 1);
        assert!(summary.completed_at.is_some());

        let late = ctx.emit(TraceEventKind::RunStarted {
            workflow_name: "late".to_string(),
            block_count: 0,
        });
        assert!(late.is_none());
        assert!(!ctx.record_result(succeeded("b")));

        // Idempotent
        let again = ctx.finish(RunStatus::Aborted);
        assert_eq!(again.status, RunStatus::Completed);
        assert_eq!(ctx.events().iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn subscriber_replays_then_follows_and_ends() {
        let ctx = context();
        ctx.emit_block("a", BlockStatus::Running, 1, None, 0);

        let stream = ctx.subscribe();

        let producer = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.record_result(succeeded("a"));
                ctx.finish(RunStatus::Completed);
            })
        };

        let events: Vec<TraceEvent> = stream.collect().await;
        producer.await.unwrap();

        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn late_subscriber_gets_full_finite_trace() {
        let ctx = context();
        ctx.record_result(succeeded("a"));
        ctx.finish(RunStatus::Completed);

        let events: Vec<TraceEvent> = ctx.subscribe().collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn lagging_subscriber_catches_up_from_log() {
        // Capacity 1 forces lag as soon as two events are published.
        let ctx = ExecutionContext::new(Uuid::now_v7(), "lag", json!({}), 1);
        let stream = ctx.subscribe();
        for i in 0..10 {
            ctx.emit_block(&format!("b{i}"), BlockStatus::Running, 1, None, 0);
        }
        ctx.finish(RunStatus::Completed);

        let events: Vec<TraceEvent> = stream.collect().await;
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (0..=10).collect::<Vec<u64>>());
    }
}
