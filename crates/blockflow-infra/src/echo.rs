//! Deterministic in-process provider for dry runs.
//!
//! Echoes the resolved prompt back without any network I/O, so a graph's
//! wiring, templates, and conditions can be exercised offline.

use blockflow_core::capability::provider::CapabilityProvider;
use blockflow_types::capability::{CapabilityRequest, CapabilityResponse};
use blockflow_types::error::CapabilityError;
use serde_json::json;

#[derive(Debug, Default, Clone)]
pub struct EchoProvider;

impl EchoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CapabilityProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn supports(&self, capability: &str) -> bool {
        matches!(capability, "chat" | "reasoning" | "rag" | "agent")
    }

    async fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let text = format!("[echo] {}", request.prompt);
        let output = match request.capability.as_str() {
            "reasoning" => json!({
                "answer": text,
                "reasoning": "",
                "confidence": 1.0,
                "pattern_used": request
                    .parameters
                    .get("pattern")
                    .and_then(|p| p.as_str())
                    .unwrap_or("chain_of_thought"),
                "model": "echo",
            }),
            "rag" => json!({
                "answer": text,
                "sources": [],
                "confidence": 1.0,
                "model": "echo",
                "passages_used": 0,
            }),
            "agent" => json!({
                "answer": text,
                "success": true,
                "steps": [],
                "iterations_used": 0,
                "model": "echo",
            }),
            _ => json!(text),
        };
        Ok(CapabilityResponse {
            output,
            model: Some("echo".to_string()),
        })
    }
}
