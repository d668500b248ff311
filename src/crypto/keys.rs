//! Key material for the AEAD codec.
//!
//! Two policies:
//! - [`PersistedKey`]: 32 random bytes generated on first use and kept in a
//!   protected keychain slot. There is no rotation; losing the slot makes the
//!   settings file unrecoverable.
//! - [`derive_key`]: PBKDF2-HMAC-SHA256 over a user password and a random
//!   32-byte salt, used for portable backups. The salt travels with the
//!   ciphertext.

use std::sync::Arc;

use rand::RngCore;
use sha2::Sha256;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{Result, SyncError};
use crate::keychain::SecretSlot;

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Salt length in bytes for password-derived keys.
pub const SALT_LEN: usize = 32;

/// PBKDF2 iteration count for password-derived keys.
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// Slot name for the settings master key.
pub const MASTER_KEY_SLOT: &str = "settings.master-key";

/// A 256-bit key that is wiped from memory on drop.
pub type SymmetricKey = Zeroizing<[u8; KEY_LEN]>;

/// Generate a fresh random salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a key from a password and salt.
pub fn derive_key(password: &str, salt: &[u8]) -> SymmetricKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key[..]);
    key
}

/// The settings-at-rest key, persisted hex-encoded in a keychain slot.
pub struct PersistedKey {
    slot: Arc<dyn SecretSlot>,
    name: String,
}

impl PersistedKey {
    pub fn new(slot: Arc<dyn SecretSlot>) -> Self {
        Self::with_name(slot, MASTER_KEY_SLOT)
    }

    pub fn with_name(slot: Arc<dyn SecretSlot>, name: impl Into<String>) -> Self {
        Self {
            slot,
            name: name.into(),
        }
    }

    /// Read the key, creating and storing it on first use.
    pub fn get_or_create(&self) -> Result<SymmetricKey> {
        if let Some(encoded) = self.slot.get(&self.name)? {
            debug!(slot = %self.name, "using persisted settings key");
            return decode_key(&encoded);
        }

        info!(slot = %self.name, "generating new settings key");
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::thread_rng().fill_bytes(&mut key[..]);
        let encoded = Zeroizing::new(hex::encode(&key[..]));
        self.slot.set(&self.name, &encoded)?;
        Ok(key)
    }
}

fn decode_key(encoded: &str) -> Result<SymmetricKey> {
    let bytes = Zeroizing::new(
        hex::decode(encoded.trim())
            .map_err(|e| SyncError::keychain(format!("stored key is not valid hex: {}", e)))?,
    );
    if bytes.len() != KEY_LEN {
        return Err(SyncError::keychain(format!(
            "stored key must be {} bytes, got {}",
            KEY_LEN,
            bytes.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keychain::MemorySlot;

    #[test]
    fn test_persisted_key_is_stable() {
        let slot: Arc<dyn SecretSlot> = Arc::new(MemorySlot::new());
        let first = PersistedKey::new(slot.clone()).get_or_create().unwrap();
        let second = PersistedKey::new(slot.clone()).get_or_create().unwrap();
        assert_eq!(*first, *second);
        assert!(slot.get(MASTER_KEY_SLOT).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_slot_is_an_error() {
        let slot: Arc<dyn SecretSlot> = Arc::new(MemorySlot::new());
        slot.set(MASTER_KEY_SLOT, "abcd").unwrap();
        assert!(PersistedKey::new(slot).get_or_create().is_err());
    }

    #[test]
    fn test_derive_key_depends_on_password_and_salt() {
        let salt = [9u8; SALT_LEN];
        let a = derive_key("correct horse", &salt);
        assert_eq!(*a, *derive_key("correct horse", &salt));
        assert_ne!(*a, *derive_key("wrong horse", &salt));
        assert_ne!(*a, *derive_key("correct horse", &[8u8; SALT_LEN]));
    }

    #[test]
    fn test_salts_are_random() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
