//! Draftline CLI entry point.
//!
//! Binary name: `draftline`
//!
//! Inspects and administers checkpointed workflow threads stored under the
//! data directory.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use draftline_observe::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands, ConfigCommand, ThreadsCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions::from_verbosity(cli.verbose, cli.quiet))
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Completions need no app state.
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "draftline", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Threads { action } => match action {
            ThreadsCommand::List => cli::threads::list_threads(&state, cli.json).await?,
            ThreadsCommand::Show { thread_id } => cli::threads::show_thread(&state, &thread_id, cli.json).await?,
            ThreadsCommand::History { thread_id, limit, asc } => {
                cli::threads::thread_history(&state, &thread_id, limit, asc, cli.json).await?
            }
            ThreadsCommand::Readiness { thread_id } => {
                cli::threads::thread_readiness(&state, &thread_id, cli.json).await?
            }
            ThreadsCommand::Delete { thread_id, force } => {
                cli::threads::delete_thread(&state, &thread_id, force, cli.json).await?
            }
        },
        Commands::Config { action } => match action {
            ConfigCommand::Show => cli::config::show_config(&state, cli.json)?,
            ConfigCommand::Path => cli::config::show_config_path(&state, cli.json)?,
        },
        Commands::Completions { .. } => {}
    }

    Ok(())
}
