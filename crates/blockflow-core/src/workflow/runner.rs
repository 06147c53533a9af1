//! Block runner: executes exactly one attempt of one block.
//!
//! `BlockRunner` parses a block into a `BlockOperation`, resolves its merged
//! input, and dispatches to the matching handler. It never retries; retry is
//! a recovery strategy. Every attempt publishes a `running` transition and
//! then a `succeeded`/`failed` transition onto the run's trace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blockflow_types::capability::CapabilityRequest;
use blockflow_types::error::CapabilityError;
use blockflow_types::execution::BlockStatus;
use blockflow_types::graph::{Block, BlockKind};
use blockflow_types::recovery::AlternateBehavior;
use serde_json::{Map, Value, json};

use crate::capability::box_provider::BoxCapabilityProvider;

use super::context::ExecutionContext;
use super::expression::ConditionEvaluator;
use super::operation::{AggregateMode, BlockOperation, ModelCallSpec, TransformOp};
use super::template::{lookup_path, render, value_to_string};

// ---------------------------------------------------------------------------
// MergedInput
// ---------------------------------------------------------------------------

/// Input handed to a block: the run's initial input bag plus the outputs of
/// satisfied data-carrying upstream connections, in connection order.
#[derive(Debug, Clone, Default)]
pub struct MergedInput {
    pub input: Value,
    pub upstream: Vec<(String, Value)>,
}

impl MergedInput {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            upstream: Vec::new(),
        }
    }

    pub fn with_upstream(mut self, block_id: impl Into<String>, output: Value) -> Self {
        self.push_upstream(block_id, output);
        self
    }

    /// Add an upstream output. A source feeding the block twice is merged once.
    pub fn push_upstream(&mut self, block_id: impl Into<String>, output: Value) {
        let block_id = block_id.into();
        if !self.upstream.iter().any(|(id, _)| *id == block_id) {
            self.upstream.push((block_id, output));
        }
    }

    fn inputs_object(&self) -> Map<String, Value> {
        self.upstream
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect()
    }

    /// `{ "input": ..., "inputs": { <id>: <output> } }` -- the scope that
    /// templates, `pick`, and condition expressions resolve against.
    pub fn to_value(&self) -> Value {
        json!({
            "input": self.input,
            "inputs": Value::Object(self.inputs_object()),
        })
    }

    /// The value single-input transforms operate on: the only upstream
    /// output, all upstream outputs as an object, or the initial input when
    /// the block has no data-carrying upstream.
    pub fn primary(&self) -> Value {
        match self.upstream.as_slice() {
            [] => self.input.clone(),
            [(_, only)] => only.clone(),
            _ => Value::Object(self.inputs_object()),
        }
    }
}

// ---------------------------------------------------------------------------
// BlockRunner
// ---------------------------------------------------------------------------

/// Executes individual blocks by dispatching on their typed operation.
pub struct BlockRunner {
    provider: Arc<BoxCapabilityProvider>,
    block_timeout: Duration,
}

impl BlockRunner {
    pub fn new(provider: Arc<BoxCapabilityProvider>, block_timeout: Duration) -> Self {
        Self {
            provider,
            block_timeout,
        }
    }

    /// Run one attempt of `block`, publishing its transitions.
    pub async fn run(
        &self,
        block: &Block,
        input: &MergedInput,
        attempt: u32,
        ctx: &ExecutionContext,
    ) -> Result<Value, CapabilityError> {
        self.run_traced(&block.id, &block.kind, &block.properties, input, attempt, ctx)
            .await
    }

    /// Run one attempt of an alternate behavior standing in for `block_id`
    /// (a fallback implementation or a compensating action).
    pub async fn run_alternate(
        &self,
        block_id: &str,
        behavior: &AlternateBehavior,
        input: &MergedInput,
        attempt: u32,
        ctx: &ExecutionContext,
    ) -> Result<Value, CapabilityError> {
        self.run_traced(block_id, &behavior.kind, &behavior.properties, input, attempt, ctx)
            .await
    }

    async fn run_traced(
        &self,
        block_id: &str,
        kind: &BlockKind,
        properties: &HashMap<String, Value>,
        input: &MergedInput,
        attempt: u32,
        ctx: &ExecutionContext,
    ) -> Result<Value, CapabilityError> {
        ctx.emit_block(block_id, BlockStatus::Running, attempt, None, 0);
        tracing::debug!(
            execution_id = %ctx.execution_id(),
            block_id,
            kind = kind.as_str(),
            attempt,
            "block attempt started"
        );

        let start = Instant::now();
        let result = self.invoke(block_id, kind, properties, input).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                ctx.emit_block(block_id, BlockStatus::Succeeded, attempt, None, elapsed_ms);
                tracing::debug!(block_id, attempt, elapsed_ms, "block attempt succeeded");
            }
            Err(e) => {
                ctx.emit_block(
                    block_id,
                    BlockStatus::Failed,
                    attempt,
                    Some(e.clone().into()),
                    elapsed_ms,
                );
                tracing::debug!(
                    block_id,
                    attempt,
                    elapsed_ms,
                    error_kind = %e.kind,
                    error = e.detail.as_str(),
                    "block attempt failed"
                );
            }
        }
        result
    }

    /// Execute a kind/property combination once, bounded by the block timeout.
    /// Publishes nothing.
    pub async fn invoke(
        &self,
        block_id: &str,
        kind: &BlockKind,
        properties: &HashMap<String, Value>,
        input: &MergedInput,
    ) -> Result<Value, CapabilityError> {
        let operation = BlockOperation::parse(kind, properties)
            .map_err(|e| CapabilityError::invalid_input(e.to_string()))?;

        match tokio::time::timeout(self.block_timeout, self.execute(block_id, &operation, input))
            .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(CapabilityError::timeout(format!(
                "block '{block_id}' exceeded {}ms",
                self.block_timeout.as_millis()
            ))),
        }
    }

    async fn execute(
        &self,
        block_id: &str,
        operation: &BlockOperation,
        input: &MergedInput,
    ) -> Result<Value, CapabilityError> {
        match operation {
            BlockOperation::ModelCall(spec) => self.run_model_call(block_id, spec, input).await,
            BlockOperation::Transform(op) => run_transform(op, input),
            BlockOperation::Condition { expression } => run_condition(expression, input),
            BlockOperation::Aggregator { mode } => Ok(run_aggregator(*mode, input)),
        }
    }

    async fn run_model_call(
        &self,
        block_id: &str,
        spec: &ModelCallSpec,
        input: &MergedInput,
    ) -> Result<Value, CapabilityError> {
        if !self.provider.supports(&spec.capability) {
            return Err(CapabilityError::invalid_input(format!(
                "provider '{}' does not serve capability '{}'",
                self.provider.name(),
                spec.capability
            )));
        }

        let scope = input.to_value();
        let request = CapabilityRequest {
            capability: spec.capability.clone(),
            block_id: block_id.to_string(),
            prompt: render(&spec.prompt, &scope),
            model: spec.model.clone(),
            system_prompt: spec.system_prompt.as_deref().map(|s| render(s, &scope)),
            temperature: spec.temperature,
            parameters: spec.parameters.clone(),
        };

        let response = self.provider.invoke(&request).await?;
        tracing::debug!(
            block_id,
            capability = spec.capability.as_str(),
            model = response.model.as_deref().unwrap_or("default"),
            "capability invocation returned"
        );
        Ok(response.output)
    }
}

fn run_transform(op: &TransformOp, input: &MergedInput) -> Result<Value, CapabilityError> {
    let value = match op {
        TransformOp::Passthrough => input.primary(),
        TransformOp::Uppercase => json!(value_to_string(&input.primary()).to_uppercase()),
        TransformOp::Lowercase => json!(value_to_string(&input.primary()).to_lowercase()),
        TransformOp::Trim => json!(value_to_string(&input.primary()).trim()),
        TransformOp::Concat { separator } => {
            let parts: Vec<String> = if input.upstream.is_empty() {
                vec![value_to_string(&input.input)]
            } else {
                input.upstream.iter().map(|(_, v)| value_to_string(v)).collect()
            };
            json!(parts.join(separator))
        }
        TransformOp::Template { template } => json!(render(template, &input.to_value())),
        TransformOp::Pick { field } => {
            let scope = input.to_value();
            let primary = input.primary();
            lookup_path(&scope, field)
                .or_else(|| lookup_path(&primary, field))
                .cloned()
                .ok_or_else(|| {
                    CapabilityError::invalid_input(format!("field '{field}' not found in input"))
                })?
        }
        TransformOp::Constant { value } => value.clone(),
    };
    Ok(value)
}

fn run_condition(expression: &str, input: &MergedInput) -> Result<Value, CapabilityError> {
    let evaluator = ConditionEvaluator::new();
    let result = evaluator
        .evaluate_bool(expression, &input.to_value())
        .map_err(|e| CapabilityError::invalid_input(format!("condition eval failed: {e}")))?;
    tracing::debug!(expression, result, "condition evaluated");
    Ok(json!({ "result": result }))
}

fn run_aggregator(mode: AggregateMode, input: &MergedInput) -> Value {
    match mode {
        AggregateMode::Object => Value::Object(input.inputs_object()),
        AggregateMode::Array => Value::Array(input.upstream.iter().map(|(_, v)| v.clone()).collect()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::provider::CapabilityProvider;
    use blockflow_types::capability::CapabilityResponse;
    use blockflow_types::error::CapabilityErrorKind;
    use blockflow_types::event::TraceEventKind;
    use uuid::Uuid;

    /// Echoes the resolved prompt, or sleeps when the prompt says so.
    struct EchoProvider;

    impl CapabilityProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn supports(&self, capability: &str) -> bool {
            capability == "chat"
        }

        async fn invoke(
            &self,
            request: &CapabilityRequest,
        ) -> Result<CapabilityResponse, CapabilityError> {
            if request.prompt == "sleep" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(CapabilityResponse::text(format!("echo: {}", request.prompt)))
        }
    }

    fn runner(timeout: Duration) -> BlockRunner {
        BlockRunner::new(Arc::new(BoxCapabilityProvider::new(EchoProvider)), timeout)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::now_v7(), "runner", json!({}), 64)
    }

    fn transform(op: &str) -> Block {
        Block::new("t", BlockKind::Transform).with_property("operation", json!(op))
    }

    #[tokio::test]
    async fn model_call_resolves_prompt_template() {
        let block = Block::new("m", BlockKind::ModelCall)
            .with_property("prompt", json!("about {{ input.topic }} after {{ inputs.a }}"));
        let input = MergedInput::new(json!({ "topic": "rust" })).with_upstream("a", json!("intro"));
        let out = runner(Duration::from_secs(5))
            .run(&block, &input, 1, &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!("echo: about rust after intro"));
    }

    #[tokio::test]
    async fn unsupported_capability_is_invalid_input() {
        let block = Block::new("m", BlockKind::ModelCall)
            .with_property("prompt", json!("x"))
            .with_property("capability", json!("vision"));
        let err = runner(Duration::from_secs(5))
            .run(&block, &MergedInput::default(), 1, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, CapabilityErrorKind::InvalidInput);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_invocation_times_out() {
        let block = Block::new("m", BlockKind::ModelCall).with_property("prompt", json!("sleep"));
        let err = runner(Duration::from_millis(100))
            .run(&block, &MergedInput::default(), 1, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, CapabilityErrorKind::Timeout);
    }

    #[tokio::test]
    async fn attempt_publishes_running_then_outcome() {
        let ctx = ctx();
        let block = transform("uppercase");
        runner(Duration::from_secs(1))
            .run(&block, &MergedInput::new(json!("hi")), 3, &ctx)
            .await
            .unwrap();

        let statuses: Vec<(BlockStatus, u32)> = ctx
            .events()
            .into_iter()
            .filter_map(|e| match e.kind {
                TraceEventKind::Block { status, attempt, .. } => Some((status, attempt)),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![(BlockStatus::Running, 3), (BlockStatus::Succeeded, 3)]
        );
    }

    #[tokio::test]
    async fn failed_attempt_carries_error() {
        let ctx = ctx();
        let block = transform("pick").with_property("field", json!("inputs.missing"));
        let err = runner(Duration::from_secs(1))
            .run(&block, &MergedInput::default(), 1, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, CapabilityErrorKind::InvalidInput);
        let last = ctx.events().pop().unwrap();
        assert!(matches!(
            last.kind,
            TraceEventKind::Block {
                status: BlockStatus::Failed,
                error: Some(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn transforms() {
        let r = runner(Duration::from_secs(1));
        let c = ctx();
        let input = MergedInput::new(json!({ "name": "Ada" }))
            .with_upstream("a", json!("  one "))
            .with_upstream("b", json!({ "n": 2 }));

        let concat = transform("concat").with_property("separator", json!("|"));
        assert_eq!(r.run(&concat, &input, 1, &c).await.unwrap(), json!("  one |{\"n\":2}"));

        let pick = transform("pick").with_property("field", json!("inputs.b.n"));
        assert_eq!(r.run(&pick, &input, 1, &c).await.unwrap(), json!(2));

        let template = transform("template").with_property("template", json!("hi {{ input.name }}"));
        assert_eq!(r.run(&template, &input, 1, &c).await.unwrap(), json!("hi Ada"));

        let single = MergedInput::default().with_upstream("a", json!("  Mixed "));
        assert_eq!(r.run(&transform("trim"), &single, 1, &c).await.unwrap(), json!("Mixed"));
        assert_eq!(
            r.run(&transform("lowercase"), &single, 1, &c).await.unwrap(),
            json!("  mixed ")
        );

        let constant = transform("constant").with_property("value", json!([1, 2]));
        assert_eq!(r.run(&constant, &input, 1, &c).await.unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn passthrough_without_upstream_forwards_initial_input() {
        let out = runner(Duration::from_secs(1))
            .run(
                &transform("passthrough"),
                &MergedInput::new(json!({ "k": 1 })),
                1,
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({ "k": 1 }));
    }

    #[tokio::test]
    async fn condition_outputs_result_flag() {
        let block = Block::new("c", BlockKind::Condition)
            .with_property("expression", json!("inputs.score >= 10"));
        let input = MergedInput::default().with_upstream("score", json!(12));
        let out = runner(Duration::from_secs(1))
            .run(&block, &input, 1, &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!({ "result": true }));
    }

    #[tokio::test]
    async fn aggregator_modes() {
        let input = MergedInput::default()
            .with_upstream("x", json!(1))
            .with_upstream("y", json!(2));
        let r = runner(Duration::from_secs(1));

        let object = Block::new("agg", BlockKind::Aggregator);
        assert_eq!(
            r.run(&object, &input, 1, &ctx()).await.unwrap(),
            json!({ "x": 1, "y": 2 })
        );

        let array = Block::new("agg", BlockKind::Aggregator).with_property("mode", json!("array"));
        assert_eq!(r.run(&array, &input, 1, &ctx()).await.unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn alternate_behavior_runs_under_block_id() {
        let ctx = ctx();
        let behavior = AlternateBehavior {
            kind: BlockKind::Transform,
            properties: HashMap::from([
                ("operation".to_string(), json!("constant")),
                ("value".to_string(), json!("fallback")),
            ]),
        };
        let out = runner(Duration::from_secs(1))
            .run_alternate("primary", &behavior, &MergedInput::default(), 2, &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!("fallback"));
        assert!(ctx.events().iter().all(|e| e.block_id() == Some("primary")));
    }

    #[test]
    fn merged_input_dedups_sources() {
        let mut input = MergedInput::default();
        input.push_upstream("a", json!(1));
        input.push_upstream("a", json!(2));
        assert_eq!(input.upstream.len(), 1);
        assert_eq!(input.to_value()["inputs"]["a"], json!(1));
    }
}
