//! Configured backends and the active selection.
//!
//! The non-secret part of each [`BackendConfig`] and the active id live in
//! the encrypted settings document; the secret part (as declared by
//! [`BackendFactory::required_settings`]) lives in the `backend.<id>`
//! keychain slot as a JSON map. Generic secret operations are routed to a
//! lazily built handle for the active backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::factory::BackendFactory;
use super::manager::{BackendHandle, DEFAULT_TIMEOUT, SecretBackend, SecretMetadata};
use crate::error::{Result, SyncError};
use crate::keychain::{SecretSlot, backend_slot};
use crate::settings::{BackendConfig, SettingsStore};

/// Fired whenever the active selection changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBackendChanged {
    pub active_id: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    /// Non-secret configs in document order.
    index: Vec<BackendConfig>,
    active_id: Option<String>,
    active: Option<Arc<BackendHandle>>,
}

pub struct BackendRegistry {
    settings: Arc<SettingsStore>,
    slot: Arc<dyn SecretSlot>,
    timeout: Duration,
    state: Mutex<RegistryState>,
    changes: broadcast::Sender<ActiveBackendChanged>,
}

impl BackendRegistry {
    /// Build the registry from the current settings document.
    pub async fn open(settings: Arc<SettingsStore>) -> Result<Self> {
        let doc = settings.load().await?;
        let slot = settings.slot().clone();
        let (changes, _) = broadcast::channel(16);
        debug!(
            backends = doc.backend_configs.len(),
            active = ?doc.active_backend_id,
            "opened backend registry"
        );
        Ok(Self {
            settings,
            slot,
            timeout: DEFAULT_TIMEOUT,
            state: Mutex::new(RegistryState {
                index: doc.backend_configs,
                active_id: doc.active_backend_id,
                active: None,
            }),
            changes,
        })
    }

    /// Bound applied to every remote call made through this registry.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActiveBackendChanged> {
        self.changes.subscribe()
    }

    /// All configs without their secret settings.
    pub async fn configs(&self) -> Vec<BackendConfig> {
        self.state.lock().await.index.clone()
    }

    /// One config with its secret settings folded back in.
    pub async fn config(&self, id: &str) -> Result<Option<BackendConfig>> {
        let config = {
            let state = self.state.lock().await;
            state.index.iter().find(|c| c.id == id).cloned()
        };
        match config {
            Some(config) => Ok(Some(self.hydrate(config)?)),
            None => Ok(None),
        }
    }

    pub async fn active_id(&self) -> Option<String> {
        self.state.lock().await.active_id.clone()
    }

    pub async fn has_active_backend(&self) -> bool {
        self.state.lock().await.active_id.is_some()
    }

    /// Add or replace a config, splitting its settings into the keychain and
    /// the settings document.
    pub async fn save_config(&self, config: BackendConfig) -> Result<()> {
        let mut state = self.state.lock().await;

        let (secret, plain) = BackendFactory::split_settings(config.backend_type, &config.settings);
        let slot_name = backend_slot(&config.id);
        let previous = self.slot.get(&slot_name)?;
        if secret.is_empty() {
            self.slot.remove(&slot_name)?;
        } else {
            self.slot.set(&slot_name, &serde_json::to_string(&secret)?)?;
        }

        let stored = BackendConfig {
            settings: plain,
            ..config
        };
        let to_store = stored.clone();
        let saved = self
            .settings
            .transform(move |doc| {
                doc.upsert_backend(to_store);
                Ok(())
            })
            .await;
        if let Err(e) = saved {
            // Keychain and document must describe the same config.
            let restored = match &previous {
                Some(json) => self.slot.set(&slot_name, json),
                None => self.slot.remove(&slot_name),
            };
            if let Err(restore_err) = restored {
                error!(backend = %stored.id, error = %restore_err, "could not restore backend secrets after failed save");
            }
            return Err(e);
        }

        match state.index.iter_mut().find(|c| c.id == stored.id) {
            Some(existing) => *existing = stored.clone(),
            None => state.index.push(stored.clone()),
        }

        if state.active_id.as_deref() == Some(stored.id.as_str()) && state.active.take().is_some()
        {
            info!(backend = %stored.id, "active backend settings changed, dropping cached instance");
        }
        debug!(backend = %stored.id, kind = %stored.backend_type, "saved backend config");
        Ok(())
    }

    /// Remove a config and its keychain slot. Clears the active selection
    /// when it pointed here. Returns whether the config existed.
    pub async fn delete_config(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.index.iter().any(|c| c.id == id) {
            return Ok(false);
        }

        let was_active = state.active_id.as_deref() == Some(id);
        let target = id.to_string();
        self.settings
            .transform(move |doc| {
                doc.backend_configs.retain(|c| c.id != target);
                if doc.active_backend_id.as_deref() == Some(target.as_str()) {
                    doc.active_backend_id = None;
                }
                Ok(())
            })
            .await?;
        self.slot.remove(&backend_slot(id))?;

        state.index.retain(|c| c.id != id);
        if was_active {
            state.active_id = None;
            state.active = None;
            info!(backend = %id, "deleted the active backend, no backend is active now");
            let _ = self.changes.send(ActiveBackendChanged { active_id: None });
        }
        Ok(true)
    }

    /// Select the active backend, or clear the selection with `None`.
    ///
    /// An unknown id is an error and changes nothing. A config missing a
    /// required setting cannot be activated.
    pub async fn set_active(&self, id: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(id) = id {
            let config = state
                .index
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| SyncError::UnknownBackend(id.to_string()))?;
            BackendFactory::validate(&self.hydrate(config)?)?;
        }

        let new_id = id.map(str::to_string);
        let persisted = new_id.clone();
        self.settings
            .transform(move |doc| {
                doc.active_backend_id = persisted;
                Ok(())
            })
            .await?;

        state.active_id = new_id.clone();
        state.active = None;
        info!(active = ?new_id, "active backend changed");
        let _ = self.changes.send(ActiveBackendChanged { active_id: new_id });
        Ok(())
    }

    /// Handle for the active backend, built on first use.
    ///
    /// `Ok(None)` when no backend is active; `Err` when the active config
    /// cannot be instantiated.
    pub async fn active_backend(&self) -> Result<Option<Arc<BackendHandle>>> {
        let mut state = self.state.lock().await;
        if let Some(handle) = &state.active {
            return Ok(Some(handle.clone()));
        }
        let Some(id) = state.active_id.clone() else {
            return Ok(None);
        };

        let config = state
            .index
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownBackend(id.clone()))?;
        let handle = Arc::new(self.build_handle(config)?);
        debug!(backend = %id, kind = %handle.kind(), "instantiated active backend");
        state.active = Some(handle.clone());
        Ok(Some(handle))
    }

    /// Serve the active config `id` from a caller-built backend instead of
    /// one built by the factory, until the config is saved again or another
    /// backend is activated.
    pub async fn attach_instance(&self, id: &str, backend: Box<dyn SecretBackend>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.active_id.as_deref() != Some(id) {
            return Err(SyncError::validation(format!(
                "backend '{}' is not the active backend",
                id
            )));
        }
        let handle = BackendHandle::new(id, backend).with_timeout(self.timeout);
        debug!(backend = %id, kind = %handle.kind(), "attached backend instance");
        state.active = Some(Arc::new(handle));
        Ok(())
    }

    /// Probe a config by id, or the active backend when `id` is `None`.
    pub async fn test_connection(&self, id: Option<&str>, cancel: &CancellationToken) -> bool {
        let handle = match id {
            None => match self.active_backend().await {
                Ok(Some(handle)) => handle,
                Ok(None) => return false,
                Err(e) => {
                    warn!(error = %e, "active backend cannot be created");
                    return false;
                }
            },
            Some(id) => {
                let built = match self.config(id).await {
                    Ok(Some(config)) => {
                        BackendFactory::create_instance(&config).map(|backend| {
                            BackendHandle::new(config.id.clone(), backend)
                                .with_timeout(self.timeout)
                        })
                    }
                    Ok(None) => Err(SyncError::UnknownBackend(id.to_string())),
                    Err(e) => Err(e),
                };
                match built {
                    Ok(handle) => Arc::new(handle),
                    Err(e) => {
                        warn!(backend = %id, error = %e, "backend cannot be created");
                        return false;
                    }
                }
            }
        };
        handle.test_connection(cancel).await
    }

    pub async fn store_secret(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&SecretMetadata>,
        cancel: &CancellationToken,
    ) -> bool {
        match self.routed("store").await {
            Some(handle) => handle.store_secret(key, value, metadata, cancel).await,
            None => false,
        }
    }

    pub async fn get_secret(&self, key: &str, cancel: &CancellationToken) -> Option<Vec<u8>> {
        self.routed("get").await?.get_secret(key, cancel).await
    }

    pub async fn delete_secret(&self, key: &str, cancel: &CancellationToken) -> bool {
        match self.routed("delete").await {
            Some(handle) => handle.delete_secret(key, cancel).await,
            None => false,
        }
    }

    pub async fn secret_exists(&self, key: &str, cancel: &CancellationToken) -> bool {
        match self.routed("exists").await {
            Some(handle) => handle.secret_exists(key, cancel).await,
            None => false,
        }
    }

    /// Unlike the other generic operations, listing reports *why* it failed,
    /// including [`SyncError::NoBackend`].
    pub async fn list_secrets(
        &self,
        prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let handle = self.active_backend().await?.ok_or(SyncError::NoBackend)?;
        handle.list_secrets(prefix, cancel).await
    }

    /// The active handle for a generic operation, logging why there is none.
    async fn routed(&self, op: &str) -> Option<Arc<BackendHandle>> {
        match self.active_backend().await {
            Ok(Some(handle)) => Some(handle),
            Ok(None) => {
                debug!(op, "no backend configured");
                None
            }
            Err(e) => {
                warn!(op, error = %e, "active backend unavailable");
                None
            }
        }
    }

    fn build_handle(&self, config: BackendConfig) -> Result<BackendHandle> {
        let config = self.hydrate(config)?;
        let backend = BackendFactory::create_instance(&config)?;
        Ok(BackendHandle::new(config.id, backend).with_timeout(self.timeout))
    }

    /// Merge the keychain slice back into a config's settings.
    fn hydrate(&self, mut config: BackendConfig) -> Result<BackendConfig> {
        if let Some(json) = self.slot.get(&backend_slot(&config.id))? {
            let secret: BTreeMap<String, String> = serde_json::from_str(&json)?;
            config.settings.extend(secret);
        }
        Ok(config)
    }
}
