//! Reconciliation and transfer of signing certificates.
//!
//! Local identities and remote secrets are joined on the sanitized serial
//! number. Each certificate occupies three backend keys (PKCS#12 value,
//! passphrase, metadata) that are written and removed in that order, one
//! certificate at a time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::identity::{CredentialStore, LocalSigningIdentity};
use super::keys::{CERT_PREFIX, CertificateKeys, sanitize_serial};
use crate::error::{Result, SyncError};
use crate::secrets::{BackendHandle, BackendRegistry, SecretMetadata};

/// Where a certificate's private key material currently exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretLocation {
    None,
    LocalOnly,
    CloudOnly,
    Both,
}

impl SecretLocation {
    pub fn classify(local: bool, remote: bool) -> Self {
        match (local, remote) {
            (true, true) => SecretLocation::Both,
            (true, false) => SecretLocation::LocalOnly,
            (false, true) => SecretLocation::CloudOnly,
            (false, false) => SecretLocation::None,
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, SecretLocation::LocalOnly | SecretLocation::Both)
    }

    pub fn is_remote(self) -> bool {
        matches!(self, SecretLocation::CloudOnly | SecretLocation::Both)
    }
}

/// A certificate the caller wants a status for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRef {
    pub id: String,
    pub serial_number: String,
    pub display_name: String,
}

impl CertificateRef {
    pub fn new(
        id: impl Into<String>,
        serial_number: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            serial_number: serial_number.into(),
            display_name: display_name.into(),
        }
    }

    /// `None` when the identity has no resolved serial.
    pub fn from_identity(identity: &LocalSigningIdentity) -> Option<Self> {
        let serial = identity.serial_number.clone()?;
        Some(Self {
            id: identity
                .hash
                .clone()
                .unwrap_or_else(|| sanitize_serial(&serial)),
            serial_number: serial,
            display_name: identity.identity.clone(),
        })
    }
}

/// Reconciliation result for one certificate. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSecretInfo {
    pub certificate_id: String,
    /// Sanitized serial.
    pub serial_number: String,
    pub display_name: String,
    pub location: SecretLocation,
    pub backend_id: Option<String>,
    pub secret_key: Option<String>,
}

/// Annotation stored next to an uploaded certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSecretMetadata {
    pub serial_number: String,
    pub common_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
}

impl CertificateSecretMetadata {
    /// Metadata for `identity`, stamped with the current time and host.
    pub fn for_identity(identity: &LocalSigningIdentity) -> Self {
        Self {
            serial_number: identity
                .sanitized_serial()
                .unwrap_or_default(),
            common_name: identity.common_name.clone(),
            team_id: identity.team_id.clone(),
            expires_at: identity.expires_at,
            uploaded_at: Utc::now(),
            uploaded_by: local_hostname(),
        }
    }

    /// Flat string map for backends that annotate secrets.
    pub fn to_annotations(&self) -> SecretMetadata {
        let mut map = SecretMetadata::new();
        map.insert("serial_number".into(), self.serial_number.clone());
        map.insert("common_name".into(), self.common_name.clone());
        if let Some(team) = &self.team_id {
            map.insert("team_id".into(), team.clone());
        }
        if let Some(expires) = self.expires_at {
            map.insert("expires_at".into(), expires.to_rfc3339());
        }
        map.insert("uploaded_at".into(), self.uploaded_at.to_rfc3339());
        map.insert("uploaded_by".into(), self.uploaded_by.clone());
        map
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

pub struct CertificateSync {
    registry: Arc<BackendRegistry>,
    credentials: Arc<dyn CredentialStore>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CertificateSync {
    pub fn new(registry: Arc<BackendRegistry>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            registry,
            credentials,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Per-certificate lock serializing upload/delete of the same serial.
    fn lock_for(&self, serial: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(serial.to_string()).or_default().clone()
    }

    async fn require_backend(&self) -> Result<Arc<BackendHandle>> {
        self.registry.active_backend().await?.ok_or(SyncError::NoBackend)
    }

    /// Sanitized serials of valid local identities.
    async fn local_serials(&self) -> Result<HashSet<String>> {
        Ok(self
            .credentials
            .list_signing_identities()
            .await?
            .into_iter()
            .filter(|i| i.is_valid)
            .filter_map(|i| i.sanitized_serial())
            .collect())
    }

    /// Sanitized serials that have a value key in the active backend. A
    /// listing failure yields an empty set.
    async fn remote_serials(
        &self,
        cancel: &CancellationToken,
    ) -> (Option<Arc<BackendHandle>>, HashSet<String>) {
        let handle = match self.registry.active_backend().await {
            Ok(Some(handle)) => handle,
            Ok(None) => return (None, HashSet::new()),
            Err(e) => {
                warn!(error = %e, "active backend unavailable, showing local state only");
                return (None, HashSet::new());
            }
        };

        let serials = match handle.list_secrets(Some(CERT_PREFIX), cancel).await {
            Ok(keys) => keys
                .iter()
                .filter_map(|k| CertificateKeys::serial_from_value_key(k))
                .collect(),
            Err(e) => {
                warn!(backend = %handle.id(), error = %e, "listing remote certificates failed, treating cloud as empty");
                HashSet::new()
            }
        };
        (Some(handle), serials)
    }

    /// Classify each certificate by where its key material exists.
    pub async fn get_statuses(
        &self,
        certificates: &[CertificateRef],
        cancel: &CancellationToken,
    ) -> Result<Vec<CertificateSecretInfo>> {
        let (local, (handle, remote)) =
            futures::join!(self.local_serials(), self.remote_serials(cancel));
        let local = local?;

        Ok(certificates
            .iter()
            .map(|cert| classify(cert, &local, &remote, handle.as_deref()))
            .collect())
    }

    /// Statuses for every certificate either side knows about: valid local
    /// identities plus remote-only serials.
    pub async fn reconcile(&self, cancel: &CancellationToken) -> Result<Vec<CertificateSecretInfo>> {
        let (identities, (handle, remote)) = futures::join!(
            self.credentials.list_signing_identities(),
            self.remote_serials(cancel)
        );
        let identities: Vec<LocalSigningIdentity> =
            identities?.into_iter().filter(|i| i.is_valid).collect();

        let mut refs: Vec<CertificateRef> = identities
            .iter()
            .filter_map(CertificateRef::from_identity)
            .collect();
        let local: HashSet<String> = refs
            .iter()
            .map(|r| sanitize_serial(&r.serial_number))
            .collect();

        let mut remote_only: Vec<&String> = remote.iter().filter(|s| !local.contains(*s)).collect();
        remote_only.sort();
        refs.extend(
            remote_only
                .into_iter()
                .map(|s| CertificateRef::new(s.clone(), s.clone(), format!("serial {}", s))),
        );

        Ok(refs
            .iter()
            .map(|cert| classify(cert, &local, &remote, handle.as_deref()))
            .collect())
    }

    /// Store a certificate as value, passphrase and optional metadata.
    ///
    /// If either the value or the passphrase cannot be stored, the value is
    /// deleted again before the error is returned, including when `cancel`
    /// fires mid-upload. A token that is already cancelled stores nothing.
    /// A metadata failure is only logged.
    pub async fn upload_to_cloud(
        &self,
        certificate: &CertificateRef,
        p12: &[u8],
        password: &str,
        metadata: Option<&CertificateSecretMetadata>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let keys = CertificateKeys::for_serial(&certificate.serial_number);
        if keys.serial.is_empty() {
            return Err(SyncError::validation(format!(
                "certificate '{}' has no usable serial number",
                certificate.display_name
            )));
        }
        let handle = self.require_backend().await?;
        let lock = self.lock_for(&keys.serial);
        let _guard = lock.lock().await;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let annotations = metadata.map(CertificateSecretMetadata::to_annotations);
        if !handle
            .store_secret(&keys.value, p12, annotations.as_ref(), cancel)
            .await
        {
            // A failed store may still have left a value behind.
            warn!(serial = %keys.serial, "certificate store failed, removing any partial value");
            rollback_value(&handle, &keys).await;
            return Err(upload_error(&handle, cancel, || {
                format!("failed to store certificate {}", keys.serial)
            }));
        }

        if !handle
            .store_secret(&keys.password, password.as_bytes(), None, cancel)
            .await
        {
            warn!(serial = %keys.serial, "passphrase store failed, rolling back certificate value");
            rollback_value(&handle, &keys).await;
            return Err(upload_error(&handle, cancel, || {
                format!("failed to store passphrase for certificate {}", keys.serial)
            }));
        }

        if let Some(meta) = metadata {
            match serde_json::to_vec(meta) {
                Ok(json) => {
                    if !handle.store_secret(&keys.metadata, &json, None, cancel).await {
                        warn!(serial = %keys.serial, "certificate metadata not stored");
                    }
                }
                Err(e) => warn!(serial = %keys.serial, error = %e, "could not encode metadata"),
            }
        }

        info!(serial = %keys.serial, backend = %handle.id(), "uploaded certificate");
        Ok(())
    }

    /// Fetch value and passphrase and import them into the local store.
    pub async fn download_and_install_by_serial(
        &self,
        serial: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let keys = CertificateKeys::for_serial(serial);
        let handle = self.require_backend().await?;

        let p12 = handle
            .get_secret(&keys.value, cancel)
            .await
            .map(Zeroizing::new)
            .ok_or_else(|| {
                SyncError::not_found(format!("certificate {} is not in the backend", keys.serial))
            })?;
        let password = handle
            .get_secret(&keys.password, cancel)
            .await
            .map(Zeroizing::new)
            .ok_or_else(|| {
                SyncError::not_found(format!(
                    "passphrase for certificate {} is not in the backend",
                    keys.serial
                ))
            })?;
        let password = Zeroizing::new(
            String::from_utf8(password.to_vec())
                .map_err(|_| SyncError::validation("stored passphrase is not UTF-8"))?,
        );

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if !self.credentials.import_portable(&p12, &password).await? {
            return Err(SyncError::command(
                "import",
                format!("the credential store rejected certificate {}", keys.serial),
            ));
        }
        info!(serial = %keys.serial, "installed certificate from backend");
        Ok(())
    }

    /// Delete all three keys. Only the value key decides success.
    pub async fn delete_from_cloud(&self, serial: &str, cancel: &CancellationToken) -> Result<()> {
        let keys = CertificateKeys::for_serial(serial);
        let handle = self.require_backend().await?;
        let lock = self.lock_for(&keys.serial);
        let _guard = lock.lock().await;

        let value_deleted = handle.delete_secret(&keys.value, cancel).await;
        if !handle.delete_secret(&keys.password, cancel).await {
            warn!(serial = %keys.serial, "passphrase key not deleted");
        }
        if !handle.delete_secret(&keys.metadata, cancel).await {
            warn!(serial = %keys.serial, "metadata key not deleted");
        }

        if !value_deleted {
            return Err(SyncError::provider(
                handle.kind().as_str(),
                format!("failed to delete certificate {}", keys.serial),
            ));
        }
        info!(serial = %keys.serial, backend = %handle.id(), "deleted certificate from backend");
        Ok(())
    }

    /// Export a local identity with a fresh random passphrase and upload it.
    pub async fn upload_local_identity(&self, serial: &str, cancel: &CancellationToken) -> Result<()> {
        let identity = self.find_local(serial).await?;
        let certificate = CertificateRef::from_identity(&identity).ok_or_else(|| {
            SyncError::validation(format!("identity '{}' has no serial", identity.identity))
        })?;

        let mut raw = Zeroizing::new([0u8; 24]);
        rand::thread_rng().fill_bytes(&mut raw[..]);
        let password = Zeroizing::new(URL_SAFE_NO_PAD.encode(&raw[..]));

        let p12 = Zeroizing::new(self.credentials.export_portable(&identity, &password).await?);
        let metadata = CertificateSecretMetadata::for_identity(&identity);
        self.upload_to_cloud(&certificate, &p12, &password, Some(&metadata), cancel)
            .await
    }

    /// Remove every local identity with this serial. Returns how many.
    pub async fn remove_local(&self, serial: &str) -> Result<usize> {
        let wanted = sanitize_serial(serial);
        let matching: Vec<LocalSigningIdentity> = self
            .credentials
            .list_signing_identities()
            .await?
            .into_iter()
            .filter(|i| i.sanitized_serial().as_deref() == Some(wanted.as_str()))
            .collect();

        for identity in &matching {
            self.credentials.delete_identity(identity).await?;
            debug!(identity = %identity.identity, "removed local identity");
        }
        Ok(matching.len())
    }

    /// Metadata stored for a certificate, if any.
    pub async fn metadata(
        &self,
        serial: &str,
        cancel: &CancellationToken,
    ) -> Option<CertificateSecretMetadata> {
        let keys = CertificateKeys::for_serial(serial);
        let bytes = self.registry.get_secret(&keys.metadata, cancel).await?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(serial = %keys.serial, error = %e, "unreadable certificate metadata");
                None
            }
        }
    }

    async fn find_local(&self, serial: &str) -> Result<LocalSigningIdentity> {
        let wanted = sanitize_serial(serial);
        self.credentials
            .list_signing_identities()
            .await?
            .into_iter()
            .find(|i| i.is_valid && i.sanitized_serial().as_deref() == Some(wanted.as_str()))
            .ok_or_else(|| {
                SyncError::not_found(format!("no valid local identity with serial {}", wanted))
            })
    }
}

/// Delete a possibly half-written value. The caller's token may be the
/// reason the upload failed, so the delete runs under its own.
async fn rollback_value(handle: &BackendHandle, keys: &CertificateKeys) {
    if !handle.delete_secret(&keys.value, &CancellationToken::new()).await {
        error!(
            serial = %keys.serial,
            key = %keys.value,
            "rollback failed, certificate value left without passphrase"
        );
    }
}

fn upload_error(
    handle: &BackendHandle,
    cancel: &CancellationToken,
    message: impl FnOnce() -> String,
) -> SyncError {
    if cancel.is_cancelled() {
        SyncError::Cancelled
    } else {
        SyncError::provider(handle.kind().as_str(), message())
    }
}

fn classify(
    cert: &CertificateRef,
    local: &HashSet<String>,
    remote: &HashSet<String>,
    handle: Option<&BackendHandle>,
) -> CertificateSecretInfo {
    let keys = CertificateKeys::for_serial(&cert.serial_number);
    let location = SecretLocation::classify(
        local.contains(&keys.serial),
        remote.contains(&keys.serial),
    );
    CertificateSecretInfo {
        certificate_id: cert.id.clone(),
        display_name: cert.display_name.clone(),
        location,
        backend_id: handle.map(|h| h.id().to_string()),
        secret_key: location.is_remote().then(|| keys.value.clone()),
        serial_number: keys.serial,
    }
}
