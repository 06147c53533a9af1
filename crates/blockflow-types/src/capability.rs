//! Request/response types exchanged with capability providers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability id used by model-call blocks that do not name one.
pub const DEFAULT_CAPABILITY: &str = "chat";

/// A single capability invocation issued by the block runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// Capability id (e.g., "chat", "reasoning").
    pub capability: String,
    /// Block the invocation belongs to, for logging and scripted providers.
    pub block_id: String,
    /// Prompt after template resolution.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Capability-specific extras (e.g., `pattern`, `num_branches`).
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

impl CapabilityRequest {
    pub fn new(
        capability: impl Into<String>,
        block_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            capability: capability.into(),
            block_id: block_id.into(),
            prompt: prompt.into(),
            model: None,
            system_prompt: None,
            temperature: None,
            parameters: HashMap::new(),
        }
    }
}

/// Successful capability output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityResponse {
    /// Value recorded as the block's output.
    pub output: Value,
    /// Model that actually served the request, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl CapabilityResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            output: Value::String(text.into()),
            model: None,
        }
    }
}
