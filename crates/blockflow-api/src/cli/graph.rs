//! `bflow validate` and `bflow plan`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use blockflow_core::workflow::dag::execution_waves;
use blockflow_core::workflow::definition::load_graph_file;
use blockflow_core::workflow::validate::validate;
use blockflow_types::error::{ValidationReport, Violation};
use blockflow_types::graph::WorkflowGraph;

pub(crate) fn load(file: &Path) -> Result<WorkflowGraph> {
    load_graph_file(file).with_context(|| format!("Failed to load graph {}", file.display()))
}

/// Render violations as a table.
pub(crate) fn violations_table(violations: &[Violation]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Rule").fg(Color::Cyan),
            Cell::new("Where"),
            Cell::new("Message"),
        ]);

    for v in violations {
        let location = match (&v.block_id, &v.connection) {
            (Some(id), _) => format!("block {id}"),
            (None, Some((s, t))) => format!("{s} -> {t}"),
            (None, None) => "graph".to_string(),
        };
        let rule = serde_json::to_value(v.kind)
            .ok()
            .and_then(|k| k.as_str().map(str::to_string))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(rule).fg(Color::Red),
            Cell::new(location),
            Cell::new(&v.message),
        ]);
    }
    table
}

pub(crate) fn print_report(report: &ValidationReport) {
    println!();
    println!(
        "  {} {} violation(s)",
        style("x").red().bold(),
        report.violations.len()
    );
    println!("{}", violations_table(&report.violations));
    println!();
}

pub fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let graph = load(file)?;
    let report = validate(&graph);

    if json {
        let out = serde_json::json!({
            "workflow": graph.metadata.name,
            "valid": report.is_valid(),
            "violations": report.violations,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if report.is_valid() {
        println!();
        println!(
            "  {} '{}' is valid ({} blocks, {} connections)",
            style("*").green().bold(),
            style(&graph.metadata.name).cyan(),
            graph.blocks.len(),
            graph.connections.len()
        );
        println!();
    } else {
        print_report(&report);
    }

    if !report.is_valid() {
        bail!("graph '{}' is invalid", graph.metadata.name);
    }
    Ok(())
}

pub fn handle_plan(file: &Path, json: bool) -> Result<()> {
    let graph = load(file)?;
    let report = validate(&graph);
    if !report.is_valid() {
        if !json {
            print_report(&report);
        }
        bail!("graph '{}' is invalid", graph.metadata.name);
    }

    let waves = execution_waves(&graph)?;
    let order: Vec<&String> = waves.iter().flatten().collect();

    if json {
        let out = serde_json::json!({
            "workflow": graph.metadata.name,
            "order": order,
            "waves": waves,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Wave").fg(Color::Cyan),
            Cell::new("Blocks"),
        ]);
    for (i, wave) in waves.iter().enumerate() {
        table.add_row(vec![Cell::new(i + 1), Cell::new(wave.join(", "))]);
    }

    println!();
    println!("  Plan for '{}'", style(&graph.metadata.name).cyan());
    println!(
        "  Order: {}",
        order
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_types::error::ViolationKind;
    use tempfile::TempDir;

    const VALID: &str = r#"
metadata:
  name: pipeline
blocks:
  - id: a
    kind: transform
    properties: { operation: passthrough }
  - id: b
    kind: transform
    properties: { operation: uppercase }
connections:
  - { source: a, target: b }
"#;

    #[test]
    fn validate_accepts_valid_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("graph.yaml");
        std::fs::write(&path, VALID).unwrap();
        handle_validate(&path, true).unwrap();
        handle_plan(&path, true).unwrap();
    }

    #[test]
    fn validate_rejects_invalid_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("graph.yaml");
        std::fs::write(&path, "metadata:\n  name: empty\n").unwrap();
        let err = handle_validate(&path, true).unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn missing_file_has_context() {
        let err = load(Path::new("/nonexistent/graph.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to load graph"));
    }

    #[test]
    fn table_lists_each_violation() {
        let violations = vec![
            Violation::block(ViolationKind::MissingProperty, "a", "missing 'prompt'"),
            Violation::connection(ViolationKind::DanglingConnection, "a", "zz", "unknown target"),
        ];
        let rendered = violations_table(&violations).to_string();
        assert!(rendered.contains("missing_property"));
        assert!(rendered.contains("a -> zz"));
    }
}
