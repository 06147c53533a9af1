//! Graph validation handler.

use std::time::Instant;

use axum::Json;
use serde::Serialize;

use blockflow_core::workflow::dag::execution_waves;
use blockflow_core::workflow::validate::validate;
use blockflow_types::error::Violation;
use blockflow_types::graph::WorkflowGraph;

use crate::http::response::ApiResponse;

/// Validation result returned to the builder.
#[derive(Debug, Serialize)]
pub struct GraphValidation {
    pub valid: bool,
    pub violations: Vec<Violation>,
    /// Parallel waves, present when the graph is valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waves: Option<Vec<Vec<String>>>,
}

/// POST /api/v1/graphs/validate - Report every rule the graph violates.
///
/// An invalid graph is a successful response with `valid: false`.
pub async fn validate_graph(Json(graph): Json<WorkflowGraph>) -> Json<ApiResponse<GraphValidation>> {
    let start = Instant::now();
    let report = validate(&graph);
    let valid = report.is_valid();
    let waves = if valid { execution_waves(&graph).ok() } else { None };

    Json(ApiResponse::success(
        GraphValidation {
            valid,
            violations: report.violations,
            waves,
        },
        start,
    ))
}
