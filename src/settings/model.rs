//! Settings document types.
//!
//! The whole document is persisted as one encrypted blob. Secret-valued
//! fields (identity private keys, secret backend settings) are normally kept
//! out of the document and live in keychain slots; they are only folded back
//! in for portable backups.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::secrets::BackendType;

/// Current document schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// The persisted configuration root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDocument {
    pub schema_version: u32,
    pub identities: Vec<Identity>,
    pub backend_configs: Vec<BackendConfig>,
    pub active_backend_id: Option<String>,
    pub publishers: Vec<PublisherConfig>,
    pub preferences: Preferences,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Default for SettingsDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            identities: Vec::new(),
            backend_configs: Vec::new(),
            active_backend_id: None,
            publishers: Vec::new(),
            preferences: Preferences::default(),
            last_modified: None,
        }
    }
}

impl SettingsDocument {
    pub fn backend(&self, id: &str) -> Option<&BackendConfig> {
        self.backend_configs.iter().find(|b| b.id == id)
    }

    pub fn identity(&self, id: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.id == id)
    }

    /// Insert or replace a backend config by id, keeping list order.
    pub fn upsert_backend(&mut self, config: BackendConfig) {
        match self.backend_configs.iter_mut().find(|b| b.id == config.id) {
            Some(existing) => *existing = config,
            None => self.backend_configs.push(config),
        }
    }

    /// Insert or replace an identity by id, keeping list order.
    pub fn upsert_identity(&mut self, identity: Identity) {
        match self.identities.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => *existing = identity,
            None => self.identities.push(identity),
        }
    }

    /// Check the document-level invariants: unique ids and an active id that
    /// references an existing backend config.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backend_configs {
            if !seen.insert(backend.id.as_str()) {
                return Err(SyncError::validation(format!(
                    "duplicate backend id '{}'",
                    backend.id
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for identity in &self.identities {
            if !seen.insert(identity.id.as_str()) {
                return Err(SyncError::validation(format!(
                    "duplicate identity id '{}'",
                    identity.id
                )));
            }
        }

        if let Some(active) = &self.active_backend_id
            && self.backend(active).is_none()
        {
            return Err(SyncError::UnknownBackend(active.clone()));
        }

        Ok(())
    }
}

/// A signing/publishing identity, e.g. an App Store Connect API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub kind: IdentityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Private key material. `None` in the stored document; the key lives in
    /// the `identity.<id>` keychain slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>, kind: IdentityKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            issuer_id: None,
            key_id: None,
            private_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    AppStoreConnect,
    GooglePlay,
}

/// A configured secret backend.
///
/// `settings` keys are backend-specific; which of them are secret is declared
/// by [`crate::secrets::BackendFactory::required_settings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub name: String,
    pub backend_type: BackendType,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, backend_type: BackendType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            backend_type,
            settings: BTreeMap::new(),
        }
    }

    /// Builder-style setting insert.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// A non-empty setting value.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
}

/// Where and how an app gets published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    /// Bundle id (iOS) or package name (Android).
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub auto_sync_certificates: bool,
    pub confirm_destructive_actions: bool,
    pub show_expired_certificates: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            auto_sync_certificates: false,
            confirm_destructive_actions: true,
            show_expired_certificates: false,
        }
    }
}
