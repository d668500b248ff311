//! Configuration file discovery, loading and saving.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::Config;
use crate::error::{Result, SyncError};

const FILE_NAME: &str = "certsync.kdl";

const TEMPLATE: &str = r#"// certsync process configuration.
// Backend definitions and credentials live in the encrypted settings file
// under data_dir, not here.
//
// backend_timeout is in seconds (default: 30)
// log_level accepts tracing filter syntax, CERTSYNC_LOG overrides it
defaults keychain_service="certsync" backend_timeout=30 log_level="info"
// data_dir="~/.local/share/certsync"
// keychain="login.keychain-db"
"#;

impl Config {
    /// ~/.config/certsync/certsync.kdl on every platform.
    fn xdg_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".config/certsync").join(FILE_NAME))
    }

    /// Config file search paths in priority order.
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(FILE_NAME)];

        if let Some(xdg_path) = Self::xdg_config_path() {
            paths.push(xdg_path);
        }

        // Skip the native dir where it is the XDG path (Linux).
        if let Some(config_dir) = dirs::config_dir() {
            let native_path = config_dir.join("certsync").join(FILE_NAME);
            if Self::xdg_config_path().as_ref() != Some(&native_path) {
                paths.push(native_path);
            }
        }

        if let Some(data_dir) = dirs::data_dir() {
            paths.push(data_dir.join("certsync").join(FILE_NAME));
        }

        paths
    }

    /// First existing config file in the search order.
    pub fn find_existing_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.exists())
    }

    pub fn default_config_path() -> PathBuf {
        Self::xdg_config_path().unwrap_or_else(|| PathBuf::from(FILE_NAME))
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        knuffel::parse::<Config>(FILE_NAME, content).map_err(|e| SyncError::config(e.to_string()))
    }

    /// Load the first config file found, or defaults when there is none.
    pub fn load() -> Result<Self> {
        match Self::find_existing_config() {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                Self::load_from_path(&path)
            }
            None => Ok(Config::default()),
        }
    }

    /// Write a commented template config file.
    pub fn generate_config_file(path: Option<PathBuf>, overwrite: bool) -> Result<PathBuf> {
        let config_path = path.unwrap_or_else(Self::default_config_path);

        if config_path.exists() && !overwrite {
            return Err(SyncError::config(format!(
                "config file already exists at: {}. Use --overwrite to replace it.",
                config_path.display()
            )));
        }

        if let Some(parent) = config_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, TEMPLATE)?;
        Ok(config_path)
    }

    /// Serialize config to KDL.
    pub fn to_kdl(&self) -> String {
        let mut output = String::new();
        output.push_str("// certsync configuration file\n");
        output.push_str("// backend_timeout is in seconds (default: 30)\n\n");
        output.push_str("defaults");

        if let Some(d) = &self.defaults {
            if let Some(data_dir) = &d.data_dir {
                output.push_str(&format!(" data_dir={}", quote(data_dir)));
            }
            if let Some(service) = &d.keychain_service {
                output.push_str(&format!(" keychain_service={}", quote(service)));
            }
            if let Some(keychain) = &d.keychain {
                output.push_str(&format!(" keychain={}", quote(keychain)));
            }
            if let Some(timeout) = d.backend_timeout {
                output.push_str(&format!(" backend_timeout={}", timeout));
            }
            if let Some(level) = &d.log_level {
                output.push_str(&format!(" log_level={}", quote(level)));
            }
        }
        output.push('\n');
        output
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_kdl())?;
        Ok(())
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
