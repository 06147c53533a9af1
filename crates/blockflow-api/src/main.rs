//! blockflow CLI and REST API entry point.
//!
//! Binary name: `bflow`
//!
//! Parses CLI arguments, initializes tracing, then dispatches to the
//! appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or an engine
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "bflow", &mut std::io::stdout());
        return Ok(());
    }

    blockflow_observe::tracing_setup::init_tracing(cli.verbose, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    blockflow_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    match &cli.command {
        Commands::Validate { file } => cli::graph::handle_validate(file, cli.json),

        Commands::Plan { file } => cli::graph::handle_plan(file, cli.json),

        Commands::Run {
            file,
            input,
            engine,
        } => cli::run::handle_run(file, input.as_deref(), engine, config_path, cli.json).await,

        Commands::Health { backend } => {
            cli::health::handle_health(backend.as_deref(), config_path, cli.json).await
        }

        Commands::Serve { bind, engine } => {
            let state = AppState::init(config_path, engine).await?;
            let listener = tokio::net::TcpListener::bind(bind.as_str()).await?;

            println!(
                "  {} blockflow API listening on {}",
                console::style("*").green().bold(),
                console::style(format!("http://{bind}")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
            Ok(())
        }

        Commands::Completions { .. } => Ok(()),
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
