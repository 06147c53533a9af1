//! BackendProvider -- [`CapabilityProvider`] over the model backend HTTP API.
//!
//! One capability invocation is one HTTP request. Non-2xx statuses and
//! transport failures are mapped onto the capability error taxonomy so the
//! recovery controller can pick a default path by kind:
//!
//! | outcome                 | kind            |
//! |-------------------------|-----------------|
//! | 401, 403                | `auth`          |
//! | 429                     | `rate_limit`    |
//! | 400, 422                | `invalid_input` |
//! | client timeout, 408/504 | `timeout`       |
//! | anything else           | `provider`      |

use std::time::Duration;

use blockflow_core::capability::provider::CapabilityProvider;
use blockflow_types::capability::{CapabilityRequest, CapabilityResponse};
use blockflow_types::config::BackendConfig;
use blockflow_types::error::{CapabilityError, CapabilityErrorKind};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::types::{
    AgentRequest, AgentResponse, ChatRequest, ChatResponse, ErrorBody, HealthResponse, RagRequest,
    RagResponse, ReasoningPattern, ReasoningRequest, ReasoningResponse, ToolDefinition,
};

/// Capabilities served by the backend.
pub const SUPPORTED_CAPABILITIES: [&str; 4] = ["chat", "reasoning", "rag", "agent"];

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_BRANCHES: u8 = 3;
const DEFAULT_PASSAGES: u8 = 5;
const DEFAULT_AGENT_ITERATIONS: u8 = 5;

/// Errors from talking to the model backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid backend base URL '{0}'")]
    InvalidBaseUrl(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("backend returned HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("backend request timed out")]
    Timeout,

    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("failed to parse backend response: {0}")]
    Decode(String),

    #[error("capability '{0}' is not served by the backend")]
    UnsupportedCapability(String),

    #[error("invalid request parameter: {0}")]
    InvalidParameter(String),
}

impl BackendError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }

    /// The capability error kind this failure maps to.
    pub fn kind(&self) -> CapabilityErrorKind {
        match self {
            BackendError::Http { status, .. } => match *status {
                401 | 403 => CapabilityErrorKind::Auth,
                429 => CapabilityErrorKind::RateLimit,
                400 | 422 => CapabilityErrorKind::InvalidInput,
                408 | 504 => CapabilityErrorKind::Timeout,
                _ => CapabilityErrorKind::Provider,
            },
            BackendError::Timeout => CapabilityErrorKind::Timeout,
            BackendError::UnsupportedCapability(_) | BackendError::InvalidParameter(_) => {
                CapabilityErrorKind::InvalidInput
            }
            BackendError::InvalidBaseUrl(_)
            | BackendError::Client(_)
            | BackendError::Transport(_)
            | BackendError::Decode(_) => CapabilityErrorKind::Provider,
        }
    }
}

impl From<BackendError> for CapabilityError {
    fn from(e: BackendError) -> Self {
        CapabilityError::new(e.kind(), e.to_string())
    }
}

/// HTTP client for the model backend.
pub struct BackendProvider {
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl BackendProvider {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        Url::parse(&config.base_url)
            .map_err(|_| BackendError::InvalidBaseUrl(config.base_url.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
        })
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Build the full API URL for a given path.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn model_for(&self, request: &CapabilityRequest) -> String {
        request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, BackendError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http_error(status, &text));
        }

        response.json::<R>().await.map_err(BackendError::from_reqwest)
    }

    /// Query `GET /health`.
    pub async fn health(&self) -> Result<HealthResponse, BackendError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http_error(status, &text));
        }
        response.json().await.map_err(BackendError::from_reqwest)
    }

    async fn chat(&self, request: &CapabilityRequest) -> Result<CapabilityResponse, BackendError> {
        let body = ChatRequest {
            message: request.prompt.clone(),
            model: Some(self.model_for(request)),
            system_prompt: request.system_prompt.clone(),
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        };
        let resp: ChatResponse = self.post("/chat", &body).await?;
        tracing::debug!(
            block_id = request.block_id.as_str(),
            model = resp.model.as_str(),
            confidence = resp.confidence,
            "chat completed"
        );
        Ok(CapabilityResponse {
            output: Value::String(resp.response),
            model: Some(resp.model),
        })
    }

    async fn reasoning(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityResponse, BackendError> {
        let pattern = match request.parameters.get("pattern") {
            None | Some(Value::Null) => ReasoningPattern::default(),
            Some(Value::String(s)) => ReasoningPattern::parse(s).ok_or_else(|| {
                BackendError::InvalidParameter(format!("unknown reasoning pattern '{s}'"))
            })?,
            Some(other) => {
                return Err(BackendError::InvalidParameter(format!(
                    "pattern must be a string, got {other}"
                )));
            }
        };
        let num_branches = bounded_param(request, "num_branches", 2, 5, DEFAULT_BRANCHES)?;

        let body = ReasoningRequest {
            question: request.prompt.clone(),
            pattern,
            model: Some(self.model_for(request)),
            num_branches,
        };
        let resp: ReasoningResponse = self.post("/reasoning", &body).await?;
        let model = resp.model.clone();
        let output = serde_json::to_value(&resp).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(CapabilityResponse {
            output,
            model: Some(model),
        })
    }

    /// Retrieval-augmented answer over the backend's document index.
    async fn rag(&self, request: &CapabilityRequest) -> Result<CapabilityResponse, BackendError> {
        let include_citations = match request.parameters.get("include_citations") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(BackendError::InvalidParameter(format!(
                    "include_citations must be a boolean, got {other}"
                )));
            }
        };
        let document_ids = match request.parameters.get("document_ids") {
            None | Some(Value::Null) => None,
            Some(v) => Some(serde_json::from_value::<Vec<String>>(v.clone()).map_err(|_| {
                BackendError::InvalidParameter(format!(
                    "document_ids must be a list of strings, got {v}"
                ))
            })?),
        };

        let body = RagRequest {
            question: request.prompt.clone(),
            document_ids,
            num_passages: bounded_param(request, "num_passages", 1, 20, DEFAULT_PASSAGES)?,
            include_citations,
            model: Some(self.model_for(request)),
        };
        let resp: RagResponse = self.post("/rag/query", &body).await?;
        tracing::debug!(
            block_id = request.block_id.as_str(),
            passages = resp.passages_used,
            sources = resp.sources.len(),
            "rag query completed"
        );
        let model = resp.model.clone();
        let output = serde_json::to_value(&resp).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(CapabilityResponse {
            output,
            model: Some(model),
        })
    }

    /// Tool-using agent run. The prompt is the task.
    async fn agent(&self, request: &CapabilityRequest) -> Result<CapabilityResponse, BackendError> {
        let tools = match request.parameters.get("tools") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => serde_json::from_value::<Vec<ToolDefinition>>(v.clone()).map_err(|e| {
                BackendError::InvalidParameter(format!(
                    "tools must be a list of {{name, description}}: {e}"
                ))
            })?,
        };

        let body = AgentRequest {
            task: request.prompt.clone(),
            tools,
            max_iterations: bounded_param(
                request,
                "max_iterations",
                1,
                20,
                DEFAULT_AGENT_ITERATIONS,
            )?,
            model: Some(self.model_for(request)),
        };
        let resp: AgentResponse = self.post("/agent/execute", &body).await?;
        tracing::debug!(
            block_id = request.block_id.as_str(),
            success = resp.success,
            iterations = resp.iterations_used,
            "agent run completed"
        );
        let model = resp.model.clone();
        let output = serde_json::to_value(&resp).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(CapabilityResponse {
            output,
            model: Some(model),
        })
    }
}

/// Integer parameter within `min..=max`, or `default` when absent.
fn bounded_param(
    request: &CapabilityRequest,
    name: &str,
    min: u8,
    max: u8,
    default: u8,
) -> Result<u8, BackendError> {
    match request.parameters.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .filter(|n| (u64::from(min)..=u64::from(max)).contains(n))
            .map(|n| n as u8)
            .ok_or_else(|| {
                BackendError::InvalidParameter(format!("{name} must be {min}..={max}, got {v}"))
            }),
    }
}

fn http_error(status: StatusCode, body: &str) -> BackendError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message())
        .unwrap_or_else(|_| body.to_string());
    BackendError::Http {
        status: status.as_u16(),
        detail,
    }
}

impl CapabilityProvider for BackendProvider {
    fn name(&self) -> &str {
        "dspy-backend"
    }

    fn supports(&self, capability: &str) -> bool {
        SUPPORTED_CAPABILITIES.contains(&capability)
    }

    async fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let result = match request.capability.as_str() {
            "chat" => self.chat(request).await,
            "reasoning" => self.reasoning(request).await,
            "rag" => self.rag(request).await,
            "agent" => self.agent(request).await,
            other => Err(BackendError::UnsupportedCapability(other.to_string())),
        };
        result.map_err(|e| {
            tracing::debug!(
                block_id = request.block_id.as_str(),
                capability = request.capability.as_str(),
                error = %e,
                "backend invocation failed"
            );
            CapabilityError::from(e)
        })
    }
}

impl std::fmt::Debug for BackendProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendProvider")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider(server: &MockServer) -> BackendProvider {
        BackendProvider::new(&BackendConfig {
            base_url: server.uri(),
            default_model: "openai/gpt-4o-mini".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn chat(prompt: &str) -> CapabilityRequest {
        CapabilityRequest::new("chat", "block-1", prompt)
    }

    #[tokio::test]
    async fn chat_posts_message_and_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_partial_json(json!({
                "message": "hello",
                "model": "openai/gpt-4o-mini",
                "temperature": 0.7
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "hi there",
                "model": "openai/gpt-4o-mini"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = provider(&server).await.invoke(&chat("hello")).await.unwrap();
        assert_eq!(resp.output, json!("hi there"));
        assert_eq!(resp.model.as_deref(), Some("openai/gpt-4o-mini"));
    }

    #[tokio::test]
    async fn reasoning_forwards_pattern_and_returns_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reasoning"))
            .and(body_partial_json(json!({
                "question": "monolith or services?",
                "pattern": "tree_of_thought",
                "num_branches": 4
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "monolith",
                "reasoning": "small team",
                "confidence": 0.8,
                "pattern_used": "tree_of_thought",
                "model": "openai/gpt-4o-mini"
            })))
            .mount(&server)
            .await;

        let mut request = CapabilityRequest::new("reasoning", "b", "monolith or services?");
        request
            .parameters
            .insert("pattern".to_string(), json!("tree_of_thought"));
        request.parameters.insert("num_branches".to_string(), json!(4));

        let resp = provider(&server).await.invoke(&request).await.unwrap();
        assert_eq!(resp.output["answer"], "monolith");
        assert_eq!(resp.output["confidence"], 0.8);
    }

    #[tokio::test]
    async fn rag_posts_query_with_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rag/query"))
            .and(body_partial_json(json!({
                "question": "how does auth work?",
                "document_ids": ["doc_1", "doc_7"],
                "num_passages": 3,
                "include_citations": false,
                "model": "openai/gpt-4o-mini"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "JWT tokens",
                "sources": [{
                    "document_id": "doc_1",
                    "title": "Auth guide",
                    "excerpt": "Tokens are signed...",
                    "relevance_score": 0.91
                }],
                "confidence": 0.91,
                "model": "openai/gpt-4o-mini",
                "passages_used": 3
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = CapabilityRequest::new("rag", "b", "how does auth work?");
        request
            .parameters
            .insert("document_ids".to_string(), json!(["doc_1", "doc_7"]));
        request.parameters.insert("num_passages".to_string(), json!(3));
        request
            .parameters
            .insert("include_citations".to_string(), json!(false));

        let resp = provider(&server).await.invoke(&request).await.unwrap();
        assert_eq!(resp.output["answer"], "JWT tokens");
        assert_eq!(resp.output["passages_used"], 3);
        assert_eq!(resp.output["sources"][0]["document_id"], "doc_1");
    }

    #[tokio::test]
    async fn rag_defaults_passages_and_citations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rag/query"))
            .and(body_partial_json(json!({
                "question": "q",
                "num_passages": 5,
                "include_citations": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "nothing indexed",
                "confidence": 0.3,
                "model": "openai/gpt-4o-mini",
                "passages_used": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = provider(&server)
            .await
            .invoke(&CapabilityRequest::new("rag", "b", "q"))
            .await
            .unwrap();
        assert_eq!(resp.output["sources"], json!([]));
    }

    #[tokio::test]
    async fn agent_posts_task_with_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/execute"))
            .and(body_partial_json(json!({
                "task": "Calculate 25 * 4 + 100",
                "tools": [{ "name": "calculator", "description": "Evaluate math" }],
                "max_iterations": 8
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "200",
                "success": true,
                "steps": [{
                    "iteration": 1,
                    "thought": "multiply first",
                    "action": "calculator[25 * 4 + 100]",
                    "observation": "200"
                }],
                "iterations_used": 1,
                "model": "openai/gpt-4o-mini"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = CapabilityRequest::new("agent", "b", "Calculate 25 * 4 + 100");
        request.parameters.insert(
            "tools".to_string(),
            json!([{ "name": "calculator", "description": "Evaluate math" }]),
        );
        request.parameters.insert("max_iterations".to_string(), json!(8));

        let resp = provider(&server).await.invoke(&request).await.unwrap();
        assert_eq!(resp.output["answer"], "200");
        assert_eq!(resp.output["success"], true);
        assert_eq!(resp.output["steps"][0]["observation"], "200");
    }

    #[tokio::test]
    async fn out_of_range_parameters_are_rejected_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let provider = provider(&server).await;

        let cases = [
            ("rag", "num_passages", json!(21)),
            ("rag", "include_citations", json!("yes")),
            ("rag", "document_ids", json!("doc_1")),
            ("agent", "max_iterations", json!(0)),
            ("agent", "tools", json!([{ "name": "calculator" }])),
        ];
        for (capability, param, value) in cases {
            let mut request = CapabilityRequest::new(capability, "b", "q");
            request.parameters.insert(param.to_string(), value);
            let err = provider.invoke(&request).await.unwrap_err();
            assert_eq!(err.kind, CapabilityErrorKind::InvalidInput, "{capability}.{param}");
            assert!(err.detail.contains(param), "detail: {}", err.detail);
        }
    }

    #[tokio::test]
    async fn status_codes_map_to_error_kinds() {
        let cases = [
            (401, CapabilityErrorKind::Auth),
            (403, CapabilityErrorKind::Auth),
            (429, CapabilityErrorKind::RateLimit),
            (422, CapabilityErrorKind::InvalidInput),
            (504, CapabilityErrorKind::Timeout),
            (500, CapabilityErrorKind::Provider),
        ];
        for (status, kind) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/chat"))
                .respond_with(
                    ResponseTemplate::new(status).set_body_json(json!({ "detail": "nope" })),
                )
                .mount(&server)
                .await;

            let err = provider(&server).await.invoke(&chat("x")).await.unwrap_err();
            assert_eq!(err.kind, kind, "status {status}");
            assert!(err.detail.contains("nope"), "detail: {}", err.detail);
        }
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "response": "late", "model": "m" }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let provider = BackendProvider::new(&BackendConfig {
            base_url: server.uri(),
            default_model: "m".to_string(),
            timeout_secs: 1,
        })
        .unwrap();
        let err = provider.invoke(&chat("x")).await.unwrap_err();
        assert_eq!(err.kind, CapabilityErrorKind::Timeout);
    }

    #[tokio::test]
    async fn unknown_pattern_is_invalid_input_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut request = CapabilityRequest::new("reasoning", "b", "q");
        request
            .parameters
            .insert("pattern".to_string(), json!("astrology"));
        let err = provider(&server).await.invoke(&request).await.unwrap_err();
        assert_eq!(err.kind, CapabilityErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn health_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "healthy",
                "version": "0.1.0",
                "models_available": ["openai/gpt-4o-mini"],
                "vector_db_status": "connected",
                "documents_indexed": 0
            })))
            .mount(&server)
            .await;

        let health = provider(&server).await.health().await.unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.models_available.len(), 1);
    }
}
