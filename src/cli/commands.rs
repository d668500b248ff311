//! Command and subcommand definitions.

use clap::Subcommand;
use std::path::PathBuf;

/// Top-level commands available in certsync.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show where each signing certificate's key material lives
    Status {
        /// Include certificates that exist only in the backend
        #[arg(short, long)]
        all: bool,
    },
    /// Upload a certificate to the active backend
    Upload {
        /// Certificate serial number (any hex formatting)
        serial: String,

        /// PKCS#12 file to upload instead of exporting the local identity
        #[arg(long, value_name = "FILE")]
        p12: Option<PathBuf>,
    },
    /// Download a certificate from the active backend and import it locally
    Download {
        serial: String,
    },
    /// Delete a certificate from the active backend
    Delete {
        serial: String,

        /// Also remove the identity from the local keychain
        #[arg(long)]
        local: bool,
    },
    /// Manage secret backends
    Backend {
        #[command(subcommand)]
        command: BackendCommands,
    },
    /// Export or import a password-protected settings backup
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Manage configuration (shows current config if no subcommand provided)
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Store auxiliary secrets in the active backend
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackendCommands {
    /// List supported backend types
    Types,
    /// Show the settings a backend type takes
    Fields {
        /// Backend type, e.g. "vault" or "aws_secrets_manager"
        backend_type: String,
    },
    /// List configured backends
    List,
    /// Configure a new backend
    Add {
        backend_type: String,
        name: String,

        /// Setting as KEY=VALUE (repeatable)
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        settings: Vec<String>,

        /// Make it the active backend
        #[arg(long)]
        activate: bool,
    },
    /// Change settings of a configured backend
    Edit {
        id: String,

        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        settings: Vec<String>,
    },
    /// Remove a configured backend and its stored credentials
    Remove {
        id: String,
    },
    /// Make a configured backend the active one
    Activate {
        id: String,
    },
    /// Clear the active backend
    Deactivate,
    /// Check that a backend is reachable (active backend by default)
    Test {
        id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Write a backup of all settings, including credentials
    Export {
        file: PathBuf,
    },
    /// Replace the current settings with a backup
    Import {
        file: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Check whether a file is a certsync backup
    Check {
        file: PathBuf,
    },
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a commented config file
    Generate {
        /// Path where to create the config file (default: ~/.config/certsync/certsync.kdl)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite existing config file if it exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Print the effective configuration
    Show,
    /// Get a specific configuration value
    Get {
        /// Setting key (e.g., "data_dir", "keychain", "backend_timeout")
        key: String,
    },
    /// Set a configuration value in the config file in use
    Set {
        key: String,
        value: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SecretCommands {
    /// Store a file's contents under a name
    Put {
        name: String,
        file: PathBuf,
    },
    /// Print a secret to stdout
    Get {
        name: String,
    },
    /// Delete a secret
    Rm {
        name: String,
    },
    /// List managed secrets
    Ls,
}
