//! gerrit-relay: mirror changes and configuration between two Gerrit
//! services.
//!
//! # Usage
//!
//! ```text
//! gerrit-relay [--config <path>] daemon
//! gerrit-relay [--config <path>] sync [--project <name>] [--skip-groups] [--skip-users] [--skip-projects]
//! gerrit-relay [--config <path>] setup
//! gerrit-relay [--config <path>] send-upstream [<event-file>|-]
//! ```

mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonArgs, send_upstream::SendUpstreamArgs, setup::SetupArgs, sync::SyncArgs,
};
use relay_core::config::DEFAULT_CONFIG_PATH;
use relay_core::RelayConfig;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "gerrit-relay",
    version,
    about = "Mirror approved changes and managed configuration between two Gerrit services",
    long_about = None,
)]
struct Cli {
    /// Configuration document.
    #[arg(
        long,
        short,
        global = true,
        env = "GERRIT_RELAY_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch both event feeds and propagate and sync until signalled.
    Daemon(DaemonArgs),

    /// Ensure configured groups, accounts and projects exist on downstream.
    Sync(SyncArgs),

    /// Ensure groups and accounts, then mirror the All-Projects configuration.
    Setup(SetupArgs),

    /// Run the propagation pipeline once for a recorded comment-added event.
    SendUpstream(SendUpstreamArgs),
}

/// Load and validate the configuration document at `path`.
pub(crate) fn load_config(path: &Path) -> Result<RelayConfig> {
    RelayConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon(args) => args.run(&cli.config),
        Commands::Sync(args) => args.run(&cli.config),
        Commands::Setup(args) => args.run(&cli.config),
        Commands::SendUpstream(args) => args.run(&cli.config),
    }
}
