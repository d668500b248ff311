//! Config commands - generate, show, get and set `certsync.kdl` values.

use std::path::PathBuf;

use crate::cli::ConfigCommands;
use crate::config::Config;
use crate::error::{Result, SyncError};

/// `config_path` is the file the config was loaded from, if any.
pub fn handle_config(
    config: Config,
    config_path: Option<PathBuf>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Generate { path, overwrite } => {
            let written = Config::generate_config_file(path, overwrite)?;
            println!("Config file generated at: {}", written.display());
        }
        ConfigCommands::Show => {
            match &config_path {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("Config file: (none, using defaults)"),
            }
            println!("  data_dir: {}", config.data_dir().display());
            println!("  keychain_service: {}", config.keychain_service());
            println!("  keychain: {}", config.keychain());
            println!("  backend_timeout: {}s", config.backend_timeout().as_secs());
            println!("  log_level: {}", config.log_level());
        }
        ConfigCommands::Get { key } => {
            println!("{}", config.get_default(&key)?);
        }
        ConfigCommands::Set { key, value } => {
            let path = config_path.ok_or_else(|| {
                SyncError::config("no config file found. Run 'certsync config generate' first.")
            })?;
            let mut config = config;
            config.set_default(&key, &value)?;
            config.save(&path)?;
            println!("Updated {} = {}", key, value);
        }
    }
    Ok(())
}
