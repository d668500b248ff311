//! Command handlers for the certsync CLI.

mod backend;
mod backup;
mod certificate;
mod config_cmd;
mod secret;
mod status;

use std::sync::Arc;

use crate::certificates::{CertificateSync, CredentialStore, SecurityCli};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::keychain::{KeyringSlot, SecretSlot};
use crate::secrets::BackendRegistry;
use crate::settings::SettingsStore;

pub use backend::handle_backend;
pub use backup::handle_backup;
pub use certificate::{handle_delete, handle_download, handle_upload};
pub use config_cmd::handle_config;
pub use secret::handle_secret;
pub use status::handle_status;

/// Everything a command needs once the settings are open.
pub struct App {
    pub settings: Arc<SettingsStore>,
    pub registry: Arc<BackendRegistry>,
    pub sync: CertificateSync,
}

impl App {
    /// Open the settings store in the OS keychain and the `security` CLI
    /// credential store named by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let slot = KeyringSlot::new(config.keychain_service());
        if !slot.is_available() {
            return Err(SyncError::keychain(
                "the OS keychain is not available; certsync needs it to protect its settings key",
            ));
        }
        let slot: Arc<dyn SecretSlot> = Arc::new(slot);
        let settings = Arc::new(SettingsStore::in_dir(&config.data_dir(), slot));
        let credentials: Arc<dyn CredentialStore> = Arc::new(SecurityCli::new(config.keychain()));
        Self::with_parts(settings, credentials, config).await
    }

    pub async fn with_parts(
        settings: Arc<SettingsStore>,
        credentials: Arc<dyn CredentialStore>,
        config: &Config,
    ) -> Result<Self> {
        let registry = Arc::new(
            BackendRegistry::open(settings.clone())
                .await?
                .with_timeout(config.backend_timeout()),
        );
        let sync = CertificateSync::new(registry.clone(), credentials);
        Ok(Self {
            settings,
            registry,
            sync,
        })
    }
}
