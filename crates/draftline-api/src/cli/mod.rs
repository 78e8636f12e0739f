//! CLI command definitions for the `draftline` binary.

pub mod config;
pub mod threads;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Inspect and administer Draftline workflow threads.
#[derive(Parser)]
#[command(name = "draftline", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log errors only.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logging (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Workflow threads and their checkpoints.
    Threads {
        #[command(subcommand)]
        action: ThreadsCommand,
    },

    /// Engine configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ThreadsCommand {
    /// List threads, most recently active first.
    #[command(alias = "ls")]
    List,

    /// Show the latest state of a thread.
    Show {
        /// Thread id, e.g. `proposal_42`.
        thread_id: String,
    },

    /// Show the checkpoint history of a thread.
    History {
        thread_id: String,

        /// Maximum number of checkpoints to show.
        #[arg(long, short = 'n')]
        limit: Option<u32>,

        /// Oldest first.
        #[arg(long)]
        asc: bool,
    },

    /// Check whether every artifact is approved for final assembly.
    Readiness { thread_id: String },

    /// Delete every checkpoint of a thread.
    #[command(alias = "rm")]
    Delete {
        thread_id: String,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration.
    Show,

    /// Print the config file location.
    Path,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_history_flags() {
        let cli = Cli::parse_from(["draftline", "--json", "threads", "history", "proposal_42", "-n", "5", "--asc"]);
        assert!(cli.json);
        match cli.command {
            Commands::Threads {
                action: ThreadsCommand::History { thread_id, limit, asc },
            } => {
                assert_eq!(thread_id, "proposal_42");
                assert_eq!(limit, Some(5));
                assert!(asc);
            }
            _ => panic!("expected threads history"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["draftline", "threads", "delete", "proposal_1", "--force", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Threads {
                action: ThreadsCommand::Delete { force: true, .. }
            }
        ));
    }
}
