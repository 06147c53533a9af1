//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.blockflow/`) and
//! deserializes it into [`EngineConfig`]. A missing or malformed file at the
//! default location falls back to defaults; an explicitly requested file
//! (`--config` / `BLOCKFLOW_CONFIG`) must exist and parse.

use std::path::{Path, PathBuf};

use blockflow_types::config::EngineConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "BLOCKFLOW_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// The blockflow data directory (`~/.blockflow`).
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".blockflow")
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Load the engine configuration.
///
/// - `Some(path)`: the file must exist and parse.
/// - `None`: `~/.blockflow/config.toml` if present and valid, defaults otherwise.
pub async fn load_engine_config(explicit: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    match explicit {
        Some(path) => load_required(path).await,
        None => Ok(load_or_default(&default_config_path()).await),
    }
}

async fn load_required(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

async fn load_or_default(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}
