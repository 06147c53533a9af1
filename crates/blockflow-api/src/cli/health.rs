//! `bflow health`: probe the model backend.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use blockflow_infra::backend::BackendProvider;
use blockflow_infra::config::load_engine_config;

pub async fn handle_health(
    backend: Option<&str>,
    config_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let mut config = load_engine_config(config_path)
        .await
        .context("Failed to load engine configuration")?;
    if let Some(url) = backend {
        config.backend.base_url = url.to_string();
    }

    let provider = BackendProvider::new(&config.backend)?;
    let health = provider
        .health()
        .await
        .with_context(|| format!("Backend at {} is unreachable", config.backend.base_url))?;

    if json {
        let out = serde_json::json!({
            "base_url": config.backend.base_url,
            "status": health.status,
            "version": health.version,
            "models_available": health.models_available,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Backend {} is {}",
        style("*").green().bold(),
        style(&config.backend.base_url).cyan(),
        health.status
    );
    if let Some(version) = &health.version {
        println!("  Version: {version}");
    }
    if !health.models_available.is_empty() {
        println!("  Models: {}", health.models_available.join(", "));
    }
    println!();
    Ok(())
}
