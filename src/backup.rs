//! Password-protected, self-contained settings backups.
//!
//! Layout: `[magic(8)][salt(32)][nonce(12)][tag(16)][ciphertext]`. The key is
//! derived from the password and the embedded salt. Secrets that normally
//! live in keychain slots (identity private keys, backend secret settings)
//! are folded into the exported document so the file restores on a machine
//! without this machine's keychain.

use std::collections::BTreeMap;

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{self, SALT_LEN, derive_key, generate_salt};
use crate::error::{Result, SyncError};
use crate::keychain::{SecretSlot, backend_slot, identity_slot};
use crate::secrets::BackendFactory;
use crate::settings::{SettingsDocument, SettingsStore};

/// Format tag at the start of every backup file.
pub const MAGIC: &[u8; 8] = b"CSYNCBK1";

const HEADER_LEN: usize = MAGIC.len() + SALT_LEN;

/// Cheap format check. Does no cryptographic work.
pub fn validate_backup(blob: &[u8]) -> bool {
    blob.len() >= MAGIC.len() && &blob[..MAGIC.len()] == MAGIC
}

/// Export the current settings, hydrated with keychain-held secrets.
pub async fn export(store: &SettingsStore, password: &str) -> Result<Vec<u8>> {
    let doc = store.load().await?;
    let doc = hydrate(doc, store.slot().as_ref())?;
    let blob = encode(&doc, password)?;
    info!(
        identities = doc.identities.len(),
        backends = doc.backend_configs.len(),
        "exported settings backup"
    );
    Ok(blob)
}

/// Seal a document under a fresh salt.
pub fn encode(doc: &SettingsDocument, password: &str) -> Result<Vec<u8>> {
    if password.is_empty() {
        return Err(SyncError::validation("backup password must not be empty"));
    }
    let plaintext = Zeroizing::new(serde_json::to_vec(doc)?);
    let salt = generate_salt();
    let key = derive_key(password, &salt);
    let sealed = crypto::seal(&plaintext, &key)?;

    let mut blob = Vec::with_capacity(HEADER_LEN + sealed.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Decode a backup. The magic is checked before any key derivation.
pub fn import(blob: &[u8], password: &str) -> Result<SettingsDocument> {
    if !validate_backup(blob) {
        return Err(SyncError::InvalidBackup);
    }
    if blob.len() < HEADER_LEN {
        return Err(SyncError::encryption("backup truncated before salt end"));
    }
    let (salt, sealed) = blob[MAGIC.len()..].split_at(SALT_LEN);
    let key = derive_key(password, salt);
    let plaintext = Zeroizing::new(crypto::open(sealed, &key)?);
    let doc: SettingsDocument = serde_json::from_slice(&plaintext)?;
    debug!(schema = doc.schema_version, "decoded settings backup");
    Ok(doc)
}

/// Fold keychain-held secrets back into a document.
pub fn hydrate(mut doc: SettingsDocument, slot: &dyn SecretSlot) -> Result<SettingsDocument> {
    for identity in &mut doc.identities {
        if identity.private_key.is_none() {
            identity.private_key = slot.get(&identity_slot(&identity.id))?;
        }
    }
    for config in &mut doc.backend_configs {
        if let Some(json) = slot.get(&backend_slot(&config.id))? {
            let secret: BTreeMap<String, String> = serde_json::from_str(&json)?;
            config.settings.extend(secret);
        }
    }
    Ok(doc)
}

/// Install an imported document: secrets go back into keychain slots and
/// the stripped document replaces the stored one.
///
/// A [`crate::secrets::BackendRegistry`] opened before the restore keeps its
/// old index and must be reopened.
pub async fn restore(mut doc: SettingsDocument, store: &SettingsStore) -> Result<SettingsDocument> {
    doc.validate()?;
    let slot = store.slot();

    for identity in &mut doc.identities {
        if let Some(private_key) = identity.private_key.take() {
            slot.set(&identity_slot(&identity.id), &private_key)?;
        }
    }
    for config in &mut doc.backend_configs {
        let (secret, plain) = BackendFactory::split_settings(config.backend_type, &config.settings);
        let name = backend_slot(&config.id);
        if secret.is_empty() {
            slot.remove(&name)?;
        } else {
            slot.set(&name, &serde_json::to_string(&secret)?)?;
        }
        config.settings = plain;
    }

    let saved = store.save(doc).await?;
    info!(
        identities = saved.identities.len(),
        backends = saved.backend_configs.len(),
        "restored settings backup"
    );
    Ok(saved)
}
