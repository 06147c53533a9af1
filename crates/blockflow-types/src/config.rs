//! Engine configuration types.
//!
//! `EngineConfig` represents the `config.toml` that controls scheduling
//! limits, timeouts, trace retention, default recovery paths, and the model
//! backend. All fields have sensible defaults.

use serde::{Deserialize, Serialize};

use crate::recovery::RecoveryPolicy;

/// Top-level configuration for the execution engine.
///
/// Loaded from `~/.blockflow/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of blocks executing at the same time.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,

    /// Upper bound on a single capability invocation.
    #[serde(default = "default_block_timeout_secs")]
    pub block_timeout_secs: u64,

    /// Upper bound on a whole run. The run is aborted when exceeded.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Broadcast channel capacity for live trace subscribers.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Finished runs kept in memory for summary lookups.
    #[serde(default = "default_retained_runs")]
    pub retained_runs: usize,

    /// Default recovery paths per capability error kind.
    #[serde(default)]
    pub recovery_policy: RecoveryPolicy,

    /// Model backend connection settings.
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_max_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_block_timeout_secs() -> u64 {
    300
}

fn default_run_timeout_secs() -> u64 {
    1800
}

fn default_event_capacity() -> usize {
    1024
}

fn default_retained_runs() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
            block_timeout_secs: default_block_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            event_capacity: default_event_capacity(),
            retained_runs: default_retained_runs(),
            recovery_policy: RecoveryPolicy::default(),
            backend: BackendConfig::default(),
        }
    }
}

/// Connection settings for the HTTP model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend (e.g., "http://localhost:8000").
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used when a block does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// HTTP request timeout.
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_backend_timeout_secs() -> u64 {
    120
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}
