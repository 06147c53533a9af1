//! Infrastructure layer for blockflow.
//!
//! Contains implementations of the `CapabilityProvider` port defined in
//! `blockflow-core` (the model backend HTTP client and an in-process echo
//! provider for dry runs) plus the engine configuration loader.

pub mod backend;
pub mod config;
pub mod echo;

use blockflow_core::capability::box_provider::BoxCapabilityProvider;
use blockflow_types::config::BackendConfig;

use self::backend::{BackendError, BackendProvider};
use self::echo::EchoProvider;

/// Build the capability provider for a run: the HTTP backend, or the echo
/// provider when `dry_run` is set.
pub fn create_provider(
    config: &BackendConfig,
    dry_run: bool,
) -> Result<BoxCapabilityProvider, BackendError> {
    if dry_run {
        tracing::debug!("using echo provider (dry run)");
        return Ok(BoxCapabilityProvider::new(EchoProvider::new()));
    }
    let provider = BackendProvider::new(config)?;
    tracing::debug!(base_url = config.base_url.as_str(), "using model backend");
    Ok(BoxCapabilityProvider::new(provider))
}
