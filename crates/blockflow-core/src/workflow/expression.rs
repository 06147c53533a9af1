//! JEXL expression evaluator for condition blocks.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered string transforms.
//! Condition payloads are always passed as context objects, never
//! interpolated into the expression string.

use serde_json::{Value, json};

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("expression did not evaluate to a boolean: got {result}")]
    NotBoolean { result: Value },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

fn first_str(args: &[Value]) -> &str {
    args.first().and_then(Value::as_str).unwrap_or("")
}

fn second_str(args: &[Value]) -> &str {
    args.get(1).and_then(Value::as_str).unwrap_or("")
}

/// JEXL evaluator with the standard transforms registered.
///
/// Expressions see the block's merged input, so `input.<key>` reaches the
/// run's initial input and `inputs.<block_id>` reaches upstream outputs.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(first_str(args).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(first_str(args).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(first_str(args).trim())))
            .with_transform("contains", |args: &[Value]| {
                Ok(json!(first_str(args).contains(second_str(args))))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(first_str(args).starts_with(second_str(args))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(first_str(args).ends_with(second_str(args))))
            })
            // Works on strings, arrays, and objects
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate an expression that must produce a boolean.
    ///
    /// Unlike truthiness coercion, a non-boolean result is an error: a
    /// condition block routes to exactly one of two branches.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        match self.evaluate_value(expression, context)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::NotBoolean { result: other }),
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
