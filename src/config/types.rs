//! Configuration type definitions.

use std::path::PathBuf;
use std::time::Duration;

use knuffel::Decode;

use crate::error::SyncError;
use crate::keychain::DEFAULT_SERVICE;

pub const DEFAULT_KEYCHAIN: &str = "login.keychain-db";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const KEYS: &str = "data_dir, keychain_service, keychain, backend_timeout, log_level";

/// Expand a leading `~` or `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Main configuration structure parsed from certsync.kdl.
#[derive(Debug, Decode, Clone, Default)]
pub struct Config {
    #[knuffel(child)]
    pub defaults: Option<Defaults>,
}

#[derive(Debug, Decode, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    #[knuffel(property(name = "data_dir"))]
    pub data_dir: Option<String>,

    #[knuffel(property(name = "keychain_service"))]
    pub keychain_service: Option<String>,

    /// macOS keychain that downloaded certificates are imported into.
    #[knuffel(property)]
    pub keychain: Option<String>,

    /// Per-operation backend timeout in seconds.
    #[knuffel(property(name = "backend_timeout"))]
    pub backend_timeout: Option<u64>,

    #[knuffel(property(name = "log_level"))]
    pub log_level: Option<String>,
}

impl Config {
    fn defaults_ref(&self) -> Option<&Defaults> {
        self.defaults.as_ref()
    }

    /// Directory holding the encrypted settings file. Defaults to the
    /// platform data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.defaults_ref()
            .and_then(|d| d.data_dir.as_deref())
            .map(expand_tilde)
            .or_else(|| dirs::data_dir().map(|d| d.join("certsync")))
            .unwrap_or_else(|| PathBuf::from(".certsync"))
    }

    pub fn keychain_service(&self) -> String {
        self.defaults_ref()
            .and_then(|d| d.keychain_service.clone())
            .unwrap_or_else(|| DEFAULT_SERVICE.to_string())
    }

    pub fn keychain(&self) -> String {
        self.defaults_ref()
            .and_then(|d| d.keychain.clone())
            .unwrap_or_else(|| DEFAULT_KEYCHAIN.to_string())
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(
            self.defaults_ref()
                .and_then(|d| d.backend_timeout)
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn log_level(&self) -> String {
        self.defaults_ref()
            .and_then(|d| d.log_level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
    }

    /// Update a default setting by name.
    pub fn set_default(&mut self, key: &str, value: &str) -> crate::error::Result<()> {
        let defaults = self.defaults.get_or_insert_with(Defaults::default);
        match key {
            "data_dir" => defaults.data_dir = Some(value.to_string()),
            "keychain_service" => defaults.keychain_service = Some(value.to_string()),
            "keychain" => defaults.keychain = Some(value.to_string()),
            "backend_timeout" => {
                let secs: u64 = value.parse().map_err(|_| {
                    SyncError::config(format!("invalid number for backend_timeout: {}", value))
                })?;
                defaults.backend_timeout = Some(secs);
            }
            "log_level" => defaults.log_level = Some(value.to_string()),
            _ => {
                return Err(SyncError::config(format!(
                    "unknown setting: {}. Valid settings: {}",
                    key, KEYS
                )));
            }
        }
        Ok(())
    }

    /// Effective value of a default setting.
    pub fn get_default(&self, key: &str) -> crate::error::Result<String> {
        match key {
            "data_dir" => Ok(self.data_dir().display().to_string()),
            "keychain_service" => Ok(self.keychain_service()),
            "keychain" => Ok(self.keychain()),
            "backend_timeout" => Ok(self.backend_timeout().as_secs().to_string()),
            "log_level" => Ok(self.log_level()),
            _ => Err(SyncError::config(format!(
                "unknown setting: {}. Valid settings: {}",
                key, KEYS
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("~/certs"), home.join("certs"));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("~other"), PathBuf::from("~other"));
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::default();
        assert_eq!(config.keychain_service(), "certsync");
        assert_eq!(config.keychain(), DEFAULT_KEYCHAIN);
        assert_eq!(config.backend_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn test_set_and_get_default() {
        let mut config = Config::default();
        config.set_default("backend_timeout", "5").unwrap();
        config.set_default("log_level", "debug").unwrap();
        assert_eq!(config.get_default("backend_timeout").unwrap(), "5");
        assert_eq!(config.get_default("log_level").unwrap(), "debug");

        assert!(config.set_default("backend_timeout", "soon").is_err());
        assert!(config.set_default("editor", "vim").is_err());
        assert!(config.get_default("editor").is_err());
    }

    #[test]
    fn test_zero_timeout_falls_back() {
        let mut config = Config::default();
        config.set_default("backend_timeout", "0").unwrap();
        assert_eq!(config.backend_timeout(), Duration::from_secs(30));
    }
}
