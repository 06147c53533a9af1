//! Application state wiring the engine to its capability provider.
//!
//! AppState holds the `ExecutionEngine` shared by the CLI and the REST API.
//! The provider is chosen from the backend configuration (or the echo
//! provider for dry runs) before the engine is built.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use blockflow_core::workflow::engine::ExecutionEngine;
use blockflow_infra::config::load_engine_config;
use blockflow_infra::create_provider;
use blockflow_types::config::EngineConfig;

/// Engine overrides shared by `run` and `serve`.
#[derive(Debug, Clone, Default, Args)]
pub struct EngineArgs {
    /// Model backend base URL (overrides `backend.base_url`).
    #[arg(long)]
    pub backend: Option<String>,

    /// Use the in-process echo provider instead of the model backend.
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of blocks running at once.
    #[arg(long)]
    pub max_parallelism: Option<usize>,
}

impl EngineArgs {
    /// Apply the command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(url) = &self.backend {
            config.backend.base_url = url.clone();
        }
        if let Some(n) = self.max_parallelism {
            config.max_parallelism = n.max(1);
        }
    }
}

/// Shared application state.
///
/// Cheap to clone; used as axum router state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
}

impl AppState {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Load configuration, apply overrides, and build the engine.
    pub async fn init(config_path: Option<&Path>, args: &EngineArgs) -> anyhow::Result<Self> {
        let mut config = load_engine_config(config_path)
            .await
            .context("Failed to load engine configuration")?;
        args.apply(&mut config);

        let provider = create_provider(&config.backend, args.dry_run)
            .context("Failed to create capability provider")?;

        tracing::debug!(
            provider = provider.name(),
            max_parallelism = config.max_parallelism,
            "engine initialized"
        );

        Ok(Self::new(ExecutionEngine::new(config, provider)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_are_applied() {
        let mut config = EngineConfig::default();
        let args = EngineArgs {
            backend: Some("http://backend:9000".to_string()),
            dry_run: false,
            max_parallelism: Some(0),
        };
        args.apply(&mut config);
        assert_eq!(config.backend.base_url, "http://backend:9000");
        assert_eq!(config.max_parallelism, 1);
    }

    #[test]
    fn no_overrides_keep_config() {
        let mut config = EngineConfig::default();
        let before = config.backend.base_url.clone();
        EngineArgs::default().apply(&mut config);
        assert_eq!(config.backend.base_url, before);
    }
}
