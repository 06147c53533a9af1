//! Wire types for the model backend HTTP API.
//!
//! These mirror the backend's request/response bodies. They are NOT the
//! capability types from blockflow-types -- those are provider-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub model: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Reasoning strategies the backend offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPattern {
    Basic,
    #[default]
    ChainOfThought,
    TreeOfThought,
    React,
}

impl ReasoningPattern {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(Self::Basic),
            "chain_of_thought" => Some(Self::ChainOfThought),
            "tree_of_thought" => Some(Self::TreeOfThought),
            "react" => Some(Self::React),
            _ => None,
        }
    }
}

/// Body of `POST /reasoning`.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest {
    pub question: String,
    pub pattern: ReasoningPattern,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub num_branches: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningResponse {
    pub answer: String,
    pub reasoning: String,
    pub confidence: f64,
    pub pattern_used: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<Value>>,
}

/// Body of `POST /rag/query`.
#[derive(Debug, Clone, Serialize)]
pub struct RagRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
    pub num_passages: u8,
    pub include_citations: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A retrieved passage cited by a RAG answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSource {
    pub document_id: String,
    pub title: String,
    pub excerpt: String,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<RagSource>,
    pub confidence: f64,
    pub model: String,
    pub passages_used: u32,
}

/// A tool offered to the agent, by name and description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
}

/// Body of `POST /agent/execute`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub task: String,
    pub tools: Vec<ToolDefinition>,
    pub max_iterations: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// One thought/action/observation round of an agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub iteration: u32,
    pub thought: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub answer: String,
    pub success: bool,
    #[serde(default)]
    pub steps: Vec<AgentStep>,
    pub iterations_used: u32,
    pub model: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub models_available: Vec<String>,
}

/// Error body returned with non-2xx statuses. `detail` is a string for
/// handler errors and a list of field errors for request validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: Value,
}

impl ErrorBody {
    pub fn message(&self) -> String {
        match &self.detail {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
