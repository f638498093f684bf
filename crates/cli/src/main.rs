//! Save timelines CLI - tl command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use timeline::SaveGame;
use tracing_subscriber::EnvFilter;

mod cmd;
mod util;

/// Checkpoints, branches and restores for game save directories
#[derive(Parser)]
#[command(name = "tl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Saves root holding <game>/<save> directories (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List saves under the root and whether they have timelines
    Scan,
    /// Put a save under version control
    Create {
        /// Save as <game>/<save>
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
    },
    /// Record the live save directory as a new checkpoint
    Checkpoint {
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
        /// Checkpoint message
        #[arg(short, long)]
        message: String,
    },
    /// Reset the current branch and the live save to an earlier checkpoint
    Restore {
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
        /// Checkpoint id or unique prefix (at least 4 hex characters)
        checkpoint: String,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// List branches, or create one
    Branch {
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
        /// Branch name to create (requires --at)
        #[arg(long)]
        create: Option<String>,
        /// Checkpoint to create the branch at (used with --create)
        #[arg(long)]
        at: Option<String>,
    },
    /// Check out a branch onto the live save
    Switch {
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
        branch: String,
    },
    /// Show timeline state
    Status {
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
    },
    /// Show checkpoint history, newest first
    Log {
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
        /// Branch to show (default: current)
        #[arg(short, long)]
        branch: Option<String>,
        /// Number of checkpoints to show (default: 20)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show recorded branch pointer movements
    Reflog {
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
        /// Only entries for this branch
        #[arg(short, long)]
        branch: Option<String>,
    },
    /// Delete a timeline; the live save is kept
    Delete {
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Verify and reload a timeline in the error state
    Reinit {
        #[arg(value_parser = util::parse_save)]
        save: SaveGame,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = util::load_config(cli.root)?;

    match cli.command {
        Commands::Scan => cmd::scan::run(config).await,
        Commands::Create { save } => cmd::create::run(config, save).await,
        Commands::Checkpoint { save, message } => cmd::checkpoint::run(config, save, message).await,
        Commands::Restore { save, checkpoint, yes } => cmd::restore::run(config, save, checkpoint, yes).await,
        Commands::Branch { save, create, at } => {
            let create_pair = match (create, at) {
                (Some(name), Some(checkpoint)) => Some((name, checkpoint)),
                (Some(_), None) => anyhow::bail!("--create requires --at <checkpoint>"),
                (None, Some(_)) => anyhow::bail!("--at requires --create <branch-name>"),
                (None, None) => None,
            };
            cmd::branch::run(config, save, create_pair).await
        }
        Commands::Switch { save, branch } => cmd::branch::switch(config, save, branch).await,
        Commands::Status { save } => cmd::status::run(config, save).await,
        Commands::Log { save, branch, limit } => cmd::log::run(config, save, branch, limit).await,
        Commands::Reflog { save, branch } => cmd::log::reflog(config, save, branch).await,
        Commands::Delete { save, yes } => cmd::delete::run(config, save, yes).await,
        Commands::Reinit { save } => cmd::status::reinit(config, save).await,
        Commands::Config { write } => cmd::config::run(config, write),
    }
}
