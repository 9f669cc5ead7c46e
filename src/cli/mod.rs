//! Command-line interface.
//!
//! Parses arguments, loads settings and dispatches to the command modules.

mod commands;
mod context;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings, LoadOptions};

pub use context::AppContext;

#[derive(Parser)]
#[command(name = "shapeshift")]
#[command(about = "Book conversion worker: queue consumer, checkpointed PDF pipeline, backlog signal")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the job queue until SIGTERM or Ctrl-C
    Worker,

    /// Create a job and publish it to the queue
    Submit {
        /// Book URL
        #[arg(long)]
        url: String,
        /// Publish to the high-priority queue
        #[arg(long)]
        high_priority: bool,
        /// Address recorded as the requester
        #[arg(long, default_value = "127.0.0.1")]
        requester_ip: String,
    },

    /// Show a job's status
    Status {
        /// Job ID
        id: String,
    },

    /// Convert one book in the foreground, without the queue
    Convert {
        /// Book URL
        #[arg(long)]
        url: String,
        /// Discard any checkpoint and start over
        #[arg(long)]
        force_restart: bool,
    },

    /// Compute and publish the backlog-per-instance metric once
    Backlog,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
    })
    .await?;

    match cli.command {
        Commands::Worker => commands::cmd_worker(settings).await,
        Commands::Submit {
            url,
            high_priority,
            requester_ip,
        } => commands::cmd_submit(settings, url, high_priority, requester_ip).await,
        Commands::Status { id } => commands::cmd_status(settings, &id).await,
        Commands::Convert { url, force_restart } => {
            commands::cmd_convert(settings, &url, force_restart).await
        }
        Commands::Backlog => commands::cmd_backlog(settings).await,
    }
}
