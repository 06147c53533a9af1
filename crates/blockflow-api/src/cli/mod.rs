//! CLI command definitions for the `bflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod graph;
pub mod health;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::state::EngineArgs;

/// Run block-based AI workflow graphs.
#[derive(Parser)]
#[command(name = "bflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for debug, -vv for more, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Engine configuration file (default: ~/.blockflow/config.toml).
    #[arg(long, global = true, env = "BLOCKFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a graph file and report every violation.
    Validate {
        /// Graph file (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Print the execution order and parallel waves of a graph.
    Plan {
        /// Graph file (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Execute a graph and stream its trace.
    Run {
        /// Graph file (.yaml, .yml or .json).
        file: PathBuf,

        /// Initial input bag as a JSON object.
        #[arg(long)]
        input: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Check that the model backend is reachable.
    Health {
        /// Model backend base URL (overrides `backend.base_url`).
        #[arg(long)]
        backend: Option<String>,
    },

    /// Start the REST API server.
    Serve {
        /// Address to bind to.
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
