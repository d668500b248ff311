#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use certsync::certificates::{CertificateSync, CredentialStore, LocalSigningIdentity};
use certsync::error::{Result, SyncError};
use certsync::keychain::{MemorySlot, SecretSlot};
use certsync::secrets::{BackendRegistry, BackendType, SecretBackend, SecretMetadata};
use certsync::settings::{BackendConfig, SettingsStore};

/// In-memory backend with switchable failures. Every call is recorded as
/// `"<op>:<key>"`.
#[derive(Default)]
pub struct MemoryBackend {
    pub data: Mutex<BTreeMap<String, Vec<u8>>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_store: Mutex<HashSet<String>>,
    /// Keys that are written and then reported as failed.
    pub fail_after_write: Mutex<HashSet<String>>,
    pub fail_delete: Mutex<HashSet<String>>,
    pub fail_list: AtomicBool,
    /// Cancel this token right after storing the given key.
    pub cancel_after_store: Mutex<Option<(String, CancellationToken)>>,
    pub store_delay: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    pub fn keys(&self) -> Vec<String> {
        self.data.lock().unwrap().keys().cloned().collect()
    }

    pub fn put(&self, key: &str, value: &[u8]) {
        self.data.lock().unwrap().insert(key.into(), value.to_vec());
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &str, key: &str) {
        self.calls.lock().unwrap().push(format!("{}:{}", op, key));
    }
}

/// Boxable handle onto a shared [`MemoryBackend`].
pub struct SharedBackend(pub Arc<MemoryBackend>);

#[async_trait]
impl SecretBackend for SharedBackend {
    fn kind(&self) -> BackendType {
        BackendType::LocalFolder
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    async fn store(&self, key: &str, value: &[u8], _: Option<&SecretMetadata>) -> Result<()> {
        self.0.record("store", key);
        let delay = *self.0.store_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.0.fail_store.lock().unwrap().contains(key) {
            return Err(SyncError::provider("memory", "store refused"));
        }
        self.0.put(key, value);
        if let Some((target, token)) = self.0.cancel_after_store.lock().unwrap().as_ref()
            && target == key
        {
            token.cancel();
        }
        if self.0.fail_after_write.lock().unwrap().contains(key) {
            return Err(SyncError::provider("memory", "store failed after write"));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.0.record("get", key);
        Ok(self.0.value(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.0.record("delete", key);
        if self.0.fail_delete.lock().unwrap().contains(key) {
            return Err(SyncError::provider("memory", "delete refused"));
        }
        self.0.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        if self.0.fail_list.load(Ordering::SeqCst) {
            return Err(SyncError::provider("memory", "list refused"));
        }
        Ok(self
            .0
            .keys()
            .into_iter()
            .filter(|k| prefix.is_none_or(|p| k.starts_with(p)))
            .collect())
    }
}

/// Credential store backed by a vector of identities.
#[derive(Default)]
pub struct FakeCredentials {
    pub identities: Mutex<Vec<LocalSigningIdentity>>,
    pub imported: Mutex<Vec<(Vec<u8>, String)>>,
    pub reject_import: AtomicBool,
}

impl FakeCredentials {
    pub fn add(&self, name: &str, serial: &str, valid: bool) {
        let mut identity = LocalSigningIdentity::from_identity_string(name);
        identity.serial_number = Some(serial.to_string());
        identity.is_valid = valid;
        identity.hash = Some(format!("HASH-{}", serial));
        self.identities.lock().unwrap().push(identity);
    }
}

#[async_trait]
impl CredentialStore for FakeCredentials {
    async fn list_signing_identities(&self) -> Result<Vec<LocalSigningIdentity>> {
        Ok(self.identities.lock().unwrap().clone())
    }

    async fn export_portable(&self, identity: &LocalSigningIdentity, password: &str) -> Result<Vec<u8>> {
        Ok(format!("P12[{}|{}]", identity.identity, password).into_bytes())
    }

    async fn import_portable(&self, bytes: &[u8], password: &str) -> Result<bool> {
        if self.reject_import.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.imported
            .lock()
            .unwrap()
            .push((bytes.to_vec(), password.to_string()));
        Ok(true)
    }

    async fn delete_identity(&self, identity: &LocalSigningIdentity) -> Result<()> {
        self.identities
            .lock()
            .unwrap()
            .retain(|i| i.hash != identity.hash);
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub settings: Arc<SettingsStore>,
    pub registry: Arc<BackendRegistry>,
    pub backend: Arc<MemoryBackend>,
    pub credentials: Arc<FakeCredentials>,
    pub sync: CertificateSync,
}

pub fn settings_in(dir: &std::path::Path) -> Arc<SettingsStore> {
    let slot: Arc<dyn SecretSlot> = Arc::new(MemorySlot::new());
    Arc::new(SettingsStore::in_dir(dir, slot))
}

/// A sync engine with no active backend.
pub async fn harness_without_backend() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path());
    let registry = Arc::new(BackendRegistry::open(settings.clone()).await.unwrap());
    let credentials = Arc::new(FakeCredentials::default());
    let sync = CertificateSync::new(registry.clone(), credentials.clone());
    Harness {
        dir,
        settings,
        registry,
        backend: Arc::new(MemoryBackend::default()),
        credentials,
        sync,
    }
}

/// A sync engine whose active backend is a shared [`MemoryBackend`].
pub async fn harness() -> Harness {
    let h = harness_without_backend().await;
    let config = BackendConfig::new("Memory", BackendType::LocalFolder)
        .with_setting("path", h.dir.path().join("unused").display().to_string());
    let id = config.id.clone();
    h.registry.save_config(config).await.unwrap();
    h.registry.set_active(Some(&id)).await.unwrap();
    h.registry
        .attach_instance(&id, Box::new(SharedBackend(h.backend.clone())))
        .await
        .unwrap();
    h
}
