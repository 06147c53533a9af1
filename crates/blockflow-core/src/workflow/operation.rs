//! Typed block operations.
//!
//! A block's `kind` plus its property bag is parsed into a closed
//! `BlockOperation` enum. The runner matches it exhaustively, and the
//! validator uses the same parser so that a graph which validates is a
//! graph the runner can execute.

use std::collections::HashMap;

use blockflow_types::capability::DEFAULT_CAPABILITY;
use blockflow_types::graph::BlockKind;
use serde_json::Value;

/// Why a kind/property combination cannot be turned into an operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error("unsupported block kind '{0}'")]
    UnsupportedKind(String),

    #[error("missing required property '{0}'")]
    MissingProperty(String),

    #[error("invalid property '{name}': {reason}")]
    InvalidProperty { name: String, reason: String },
}

impl OperationError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        OperationError::InvalidProperty {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A model completion through a capability provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCallSpec {
    pub capability: String,
    /// Prompt template, resolved against the merged input at run time.
    pub prompt: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    /// Remaining properties, forwarded to the provider untouched.
    pub parameters: HashMap<String, Value>,
}

/// Pure in-process transformations.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOp {
    Passthrough,
    Uppercase,
    Lowercase,
    Trim,
    Concat { separator: String },
    Template { template: String },
    Pick { field: String },
    Constant { value: Value },
}

impl TransformOp {
    pub const NAMES: [&'static str; 8] = [
        "passthrough",
        "uppercase",
        "lowercase",
        "trim",
        "concat",
        "template",
        "pick",
        "constant",
    ];
}

/// How an aggregator joins its upstream outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregateMode {
    /// `{ <upstream id>: <output>, ... }`
    #[default]
    Object,
    /// `[ <output>, ... ]` in connection order.
    Array,
}

/// Closed set of behaviors the runner knows how to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOperation {
    ModelCall(ModelCallSpec),
    Transform(TransformOp),
    Condition { expression: String },
    Aggregator { mode: AggregateMode },
}

fn required_str(props: &HashMap<String, Value>, name: &str) -> Result<String, OperationError> {
    match props.get(name) {
        None | Some(Value::Null) => Err(OperationError::MissingProperty(name.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(OperationError::invalid(name, "must not be empty"))
        }
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(OperationError::invalid(
            name,
            format!("expected a string, got {other}"),
        )),
    }
}

fn optional_str(props: &HashMap<String, Value>, name: &str) -> Result<Option<String>, OperationError> {
    match props.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(OperationError::invalid(
            name,
            format!("expected a string, got {other}"),
        )),
    }
}

impl BlockOperation {
    /// Parse a kind and property bag into an operation.
    pub fn parse(kind: &BlockKind, props: &HashMap<String, Value>) -> Result<Self, OperationError> {
        match kind {
            BlockKind::ModelCall => Self::parse_model_call(props),
            BlockKind::Transform => Self::parse_transform(props).map(BlockOperation::Transform),
            BlockKind::Condition => Ok(BlockOperation::Condition {
                expression: required_str(props, "expression")?,
            }),
            BlockKind::Aggregator => {
                let mode = match optional_str(props, "mode")?.as_deref() {
                    None | Some("object") => AggregateMode::Object,
                    Some("array") => AggregateMode::Array,
                    Some(other) => {
                        return Err(OperationError::invalid(
                            "mode",
                            format!("unknown aggregate mode '{other}' (expected object or array)"),
                        ));
                    }
                };
                Ok(BlockOperation::Aggregator { mode })
            }
            BlockKind::Unsupported(other) => Err(OperationError::UnsupportedKind(other.clone())),
        }
    }

    fn parse_model_call(props: &HashMap<String, Value>) -> Result<Self, OperationError> {
        let prompt = required_str(props, "prompt")?;
        let capability =
            optional_str(props, "capability")?.unwrap_or_else(|| DEFAULT_CAPABILITY.to_string());
        let model = optional_str(props, "model")?;
        let system_prompt = optional_str(props, "system_prompt")?;
        let temperature = match props.get("temperature") {
            None | Some(Value::Null) => None,
            Some(v) => {
                let t = v
                    .as_f64()
                    .ok_or_else(|| OperationError::invalid("temperature", "expected a number"))?;
                if !(0.0..=2.0).contains(&t) {
                    return Err(OperationError::invalid(
                        "temperature",
                        format!("{t} is outside 0.0..=2.0"),
                    ));
                }
                Some(t as f32)
            }
        };

        let parameters = props
            .iter()
            .filter(|(k, _)| {
                !matches!(
                    k.as_str(),
                    "prompt" | "capability" | "model" | "system_prompt" | "temperature"
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(BlockOperation::ModelCall(ModelCallSpec {
            capability,
            prompt,
            model,
            system_prompt,
            temperature,
            parameters,
        }))
    }

    fn parse_transform(props: &HashMap<String, Value>) -> Result<TransformOp, OperationError> {
        let operation = required_str(props, "operation")?;
        let op = match operation.as_str() {
            "passthrough" => TransformOp::Passthrough,
            "uppercase" => TransformOp::Uppercase,
            "lowercase" => TransformOp::Lowercase,
            "trim" => TransformOp::Trim,
            "concat" => TransformOp::Concat {
                separator: optional_str(props, "separator")?.unwrap_or_else(|| "\n".to_string()),
            },
            "template" => TransformOp::Template {
                template: required_str(props, "template")?,
            },
            "pick" => TransformOp::Pick {
                field: required_str(props, "field")?,
            },
            "constant" => TransformOp::Constant {
                value: props
                    .get("value")
                    .cloned()
                    .ok_or_else(|| OperationError::MissingProperty("value".to_string()))?,
            },
            other => {
                return Err(OperationError::invalid(
                    "operation",
                    format!(
                        "unknown transform '{other}' (expected one of: {})",
                        TransformOp::NAMES.join(", ")
                    ),
                ));
            }
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn model_call_defaults_to_chat_capability() {
        let op = BlockOperation::parse(
            &BlockKind::ModelCall,
            &props(json!({ "prompt": "hi", "pattern": "react" })),
        )
        .unwrap();
        match op {
            BlockOperation::ModelCall(spec) => {
                assert_eq!(spec.capability, "chat");
                assert_eq!(spec.prompt, "hi");
                assert!(spec.model.is_none());
                assert_eq!(spec.parameters["pattern"], "react");
                assert!(!spec.parameters.contains_key("prompt"));
            }
            other => panic!("expected model call, got {other:?}"),
        }
    }

    #[test]
    fn model_call_rejects_out_of_range_temperature() {
        let err = BlockOperation::parse(
            &BlockKind::ModelCall,
            &props(json!({ "prompt": "hi", "temperature": 7.5 })),
        )
        .unwrap_err();
        assert!(matches!(err, OperationError::InvalidProperty { ref name, .. } if name == "temperature"));
    }

    #[test]
    fn missing_prompt_is_reported() {
        let err = BlockOperation::parse(&BlockKind::ModelCall, &HashMap::new()).unwrap_err();
        assert_eq!(err, OperationError::MissingProperty("prompt".to_string()));
    }

    #[test]
    fn transform_operations_parse() {
        let op = BlockOperation::parse(
            &BlockKind::Transform,
            &props(json!({ "operation": "concat" })),
        )
        .unwrap();
        assert_eq!(
            op,
            BlockOperation::Transform(TransformOp::Concat {
                separator: "\n".to_string()
            })
        );

        let op = BlockOperation::parse(
            &BlockKind::Transform,
            &props(json!({ "operation": "constant", "value": [1, 2] })),
        )
        .unwrap();
        assert_eq!(
            op,
            BlockOperation::Transform(TransformOp::Constant { value: json!([1, 2]) })
        );
    }

    #[test]
    fn unknown_transform_is_invalid() {
        let err = BlockOperation::parse(
            &BlockKind::Transform,
            &props(json!({ "operation": "explode" })),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown transform 'explode'"));
    }

    #[test]
    fn pick_requires_field() {
        let err = BlockOperation::parse(
            &BlockKind::Transform,
            &props(json!({ "operation": "pick" })),
        )
        .unwrap_err();
        assert_eq!(err, OperationError::MissingProperty("field".to_string()));
    }

    #[test]
    fn aggregator_mode() {
        let op = BlockOperation::parse(&BlockKind::Aggregator, &HashMap::new()).unwrap();
        assert_eq!(op, BlockOperation::Aggregator { mode: AggregateMode::Object });

        let err = BlockOperation::parse(
            &BlockKind::Aggregator,
            &props(json!({ "mode": "tree" })),
        )
        .unwrap_err();
        assert!(matches!(err, OperationError::InvalidProperty { .. }));
    }

    #[test]
    fn unsupported_kind() {
        let err = BlockOperation::parse(
            &BlockKind::Unsupported("oauth_card".to_string()),
            &HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, OperationError::UnsupportedKind("oauth_card".to_string()));
    }
}
