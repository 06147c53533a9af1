//! HTTP/REST API layer for blockflow.
//!
//! Axum-based REST API at `/api/v1/` for observers: start and cancel runs,
//! inspect summaries, follow trace events over SSE, and validate graphs.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
