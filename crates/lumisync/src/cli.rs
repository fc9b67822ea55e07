//! Clap derive structures for the `lumisync` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// lumisync -- keep a local mirror of your cloud lighting devices
#[derive(Debug, Parser)]
#[command(
    name = "lumisync",
    version,
    about = "Sync and control cloud-connected lighting devices",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "LUMISYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "LUMISYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mirror devices until interrupted, logging every change
    Run,

    /// Fetch the device map once and print it as JSON
    Snapshot,

    /// Write control fields to one device
    Send(SendArgs),

    /// Apply a catalog theme to one device
    Theme(ThemeArgs),
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Device id
    pub device: String,

    /// Raw control directive
    #[arg(long, short = 'd')]
    pub directive: Option<String>,

    /// Turn the device on
    #[arg(long, conflicts_with = "off")]
    pub on: bool,

    /// Turn the device off
    #[arg(long)]
    pub off: bool,

    /// Brightness level
    #[arg(long, short = 'b')]
    pub brightness: Option<u32>,
}

#[derive(Debug, Args)]
pub struct ThemeArgs {
    /// Device id
    pub device: String,

    /// Theme display name (case-insensitive)
    pub name: String,
}
