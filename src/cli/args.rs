//! CLI argument parsing structures.

use clap::{Args, Parser};
use std::path::PathBuf;

use super::commands::Commands;

/// Main CLI structure for certsync.
#[derive(Parser, Debug)]
#[command(name = "certsync", version)]
#[command(
    about = "Keep code-signing certificates in sync with a secret backend",
    long_about = None
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options available to every command.
#[derive(Debug, Default, Args)]
pub struct GlobalArgs {
    /// Config file to use instead of the search path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding the encrypted settings file
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// macOS keychain to import downloaded certificates into
    #[arg(long, global = true)]
    pub keychain: Option<String>,
}
