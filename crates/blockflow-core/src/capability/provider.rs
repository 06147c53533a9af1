//! CapabilityProvider trait definition.
//!
//! This is the port every external capability (model backend, in-process
//! echo, scripted test double) implements. Uses RPITIT for `invoke`.

use blockflow_types::capability::{CapabilityRequest, CapabilityResponse};
use blockflow_types::error::CapabilityError;

/// Trait for capability backends invoked by model-call blocks.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). A provider
/// reports exactly one invocation's outcome per call and never retries on
/// its own; failures are typed so the recovery controller can pick a
/// default path.
///
/// Implementations live in blockflow-infra (e.g., `DspyBackendProvider`).
pub trait CapabilityProvider: Send + Sync {
    /// Human-readable provider name (e.g., "dspy-backend", "echo").
    fn name(&self) -> &str;

    /// Whether the provider serves the given capability id.
    fn supports(&self, capability: &str) -> bool;

    /// Perform one invocation.
    fn invoke(
        &self,
        request: &CapabilityRequest,
    ) -> impl std::future::Future<Output = Result<CapabilityResponse, CapabilityError>> + Send;
}
