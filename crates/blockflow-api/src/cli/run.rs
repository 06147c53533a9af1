//! `bflow run`: execute a graph, stream its trace, print a summary.
//!
//! Ctrl-C cancels the run; the trace keeps streaming until the engine
//! reports the run as aborted.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use futures_util::StreamExt;
use serde_json::{Value, json};

use blockflow_core::workflow::engine::EngineError;
use blockflow_types::event::{TraceEvent, TraceEventKind};
use blockflow_types::execution::{BlockResult, BlockStatus, RunStatus, RunSummary};
use blockflow_types::recovery::RecoveryStepStatus;

use crate::cli::graph::{load, print_report};
use crate::state::{AppState, EngineArgs};

const DETAIL_WIDTH: usize = 60;

pub async fn handle_run(
    file: &Path,
    input: Option<&str>,
    engine_args: &EngineArgs,
    config_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let graph = load(file)?;
    let input = parse_input(input)?;
    let state = AppState::init(config_path, engine_args).await?;

    let handle = match state.engine.start_execution(graph, input) {
        Ok(handle) => handle,
        Err(EngineError::Validation(report)) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            bail!("graph is invalid");
        }
        Err(e) => return Err(e.into()),
    };
    let execution_id = handle.execution_id();
    tracing::info!(%execution_id, "run started");

    let events = handle.subscribe();
    tokio::pin!(events);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    if !json {
                        println!("  {}", format_event(&event));
                    }
                }
                None => break,
            },
            signal = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                    continue;
                }
                eprintln!("  {} cancelling run {execution_id}...", style("!").yellow().bold());
                if let Err(e) = state.engine.cancel_execution(execution_id) {
                    tracing::debug!(error = %e, "run already finished");
                }
            }
        }
    }

    let summary = handle.wait().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    match summary.status {
        RunStatus::Completed => Ok(()),
        status => bail!("run {execution_id} finished with status {status}"),
    }
}

/// Parse `--input`; absent means an empty bag. Must be a JSON object.
fn parse_input(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(json!({}));
    };
    let value: Value = serde_json::from_str(raw).context("Invalid JSON in --input")?;
    if !value.is_object() {
        bail!("--input must be a JSON object");
    }
    Ok(value)
}

fn step_status(status: RecoveryStepStatus) -> &'static str {
    match status {
        RecoveryStepStatus::Pending => "pending",
        RecoveryStepStatus::Executing => "executing",
        RecoveryStepStatus::Completed => "completed",
        RecoveryStepStatus::Failed => "failed",
    }
}

/// One trace line for the terminal.
pub fn format_event(event: &TraceEvent) -> String {
    let body = match &event.kind {
        TraceEventKind::RunStarted {
            workflow_name,
            block_count,
        } => format!("run started: {workflow_name} ({block_count} blocks)"),
        TraceEventKind::Block {
            block_id,
            status,
            attempt,
            error,
            duration_ms,
        } => {
            let mut line = format!("{block_id}: {status} (attempt {attempt})");
            if status.is_terminal() {
                line.push_str(&format!(" in {duration_ms}ms"));
            }
            if let Some(error) = error {
                line.push_str(&format!(" - {error}"));
            }
            line
        }
        TraceEventKind::Recovery {
            block_id,
            step_index,
            step_name,
            strategy,
            status,
            ..
        } => format!(
            "{block_id}: recovery step {} '{step_name}' ({strategy}) {}",
            step_index + 1,
            step_status(*status)
        ),
        TraceEventKind::BlockFinished { result } => {
            format!("{} => {}", result.block_id, status_label(result))
        }
        TraceEventKind::RunFinished { summary } => format!("run {}", summary.status),
    };
    format!("[{:>4}] {body}", event.seq)
}

fn status_label(result: &BlockResult) -> String {
    let mut label = result.status.to_string();
    if result.degraded {
        label.push_str(" (degraded)");
    }
    if result.compensated {
        label.push_str(" (compensated)");
    }
    label
}

fn status_color(status: BlockStatus) -> Color {
    match status {
        BlockStatus::Succeeded => Color::Green,
        BlockStatus::Recovered => Color::Yellow,
        BlockStatus::Failed | BlockStatus::Escalated => Color::Red,
        BlockStatus::Skipped | BlockStatus::Pending | BlockStatus::Running => Color::DarkGrey,
    }
}

/// Output (or error) of a block, shortened for the summary table.
pub fn detail(result: &BlockResult) -> String {
    let text = match (&result.output, &result.error) {
        (_, Some(error)) => error.to_string(),
        (Some(Value::String(s)), None) => s.clone(),
        (Some(other), None) => other.to_string(),
        (None, None) => String::new(),
    };
    let text = text.replace('\n', " ");
    if text.chars().count() > DETAIL_WIDTH {
        let cut: String = text.chars().take(DETAIL_WIDTH - 3).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn print_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Block").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Output / Error"),
        ]);

    for result in &summary.block_results {
        table.add_row(vec![
            Cell::new(&result.block_id),
            Cell::new(status_label(result)).fg(status_color(result.status)),
            Cell::new(result.attempts),
            Cell::new(format!("{}ms", result.duration_ms)),
            Cell::new(detail(result)),
        ]);
    }

    let status = match summary.status {
        RunStatus::Completed => style(summary.status.to_string()).green().bold(),
        RunStatus::Running => style(summary.status.to_string()).cyan(),
        RunStatus::Failed | RunStatus::Aborted => style(summary.status.to_string()).red().bold(),
    };

    println!();
    println!(
        "  Run {} of '{}': {}",
        style(summary.execution_id).dim(),
        style(&summary.workflow_name).cyan(),
        status
    );
    println!("{table}");
    println!();
}
