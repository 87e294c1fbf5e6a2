use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// vigild: supervise processes and equipment by heartbeat, flag the
/// quality of their tags and watch alarms for oscillation.
#[derive(Debug, Parser)]
#[command(name = "vigild", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the configuration file
    #[arg(long, short = 'c', env = "VIGIL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv); overrides [logging] level
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Subcommand)]
pub enum Command {
    /// Start the engine and run until interrupted (default)
    #[default]
    Run,

    /// Like `run`, additionally reading newline-delimited JSON updates
    /// from stdin into the ingest pool
    Stdin,

    /// Validate the configuration and topology, then exit
    Check,

    /// Print the effective configuration as TOML
    PrintConfig,
}
