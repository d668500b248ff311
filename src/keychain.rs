//! Protected secret slots backed by the OS keychain.
//!
//! A slot is a named string value kept in platform secure storage (macOS
//! Keychain, Linux kernel keyutils / Secret Service). certsync keeps three
//! kinds of values there:
//!
//! - the settings master key (`settings.master-key`)
//! - each backend config's secret settings (`backend.<id>`)
//! - each identity's private key (`identity.<id>`)
//!
//! Entry key format inside the keychain: service = configured service name,
//! user = slot name.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, SyncError};

/// Default keychain service name.
pub const DEFAULT_SERVICE: &str = "certsync";

/// Named secure storage for small string secrets.
///
/// `get` of a missing slot is `Ok(None)`; `remove` of a missing slot is
/// `Ok(())`.
pub trait SecretSlot: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>>;
    fn set(&self, name: &str, value: &str) -> Result<()>;
    fn remove(&self, name: &str) -> Result<()>;
}

/// Slot implementation over the `keyring` crate.
pub struct KeyringSlot {
    service: String,
}

impl KeyringSlot {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name).map_err(SyncError::from)
    }

    /// Check whether the OS keychain backend is functional.
    ///
    /// Performs a real round-trip probe: writes a test value, reads it back,
    /// and deletes it. Returns `false` if any step fails, which catches cases
    /// where `keyring` falls back to a non-functional mock store.
    pub fn is_available(&self) -> bool {
        let entry = match keyring::Entry::new(&self.service, "__certsync_probe__") {
            Ok(e) => e,
            Err(_) => return false,
        };

        let probe_value = "__certsync_probe_value__";

        if entry.set_password(probe_value).is_err() {
            return false;
        }

        let ok = entry
            .get_password()
            .map(|v| v == probe_value)
            .unwrap_or(false);

        // Always clean up the probe entry
        let _ = entry.delete_credential();

        ok
    }
}

impl SecretSlot for KeyringSlot {
    fn get(&self, name: &str) -> Result<Option<String>> {
        match self.entry(name)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.entry(name)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local slot store. Used by tests and `--ephemeral` runs where no
/// keychain is reachable; contents vanish with the process.
#[derive(Default)]
pub struct MemorySlot {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all populated slots, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SyncError::keychain("memory slot lock poisoned"))
    }
}

impl SecretSlot for MemorySlot {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.lock()?.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.lock()?.remove(name);
        Ok(())
    }
}

/// Slot name holding a backend config's secret settings.
pub fn backend_slot(id: &str) -> String {
    format!("backend.{}", id)
}

/// Slot name holding an identity's private key.
pub fn identity_slot(id: &str) -> String {
    format!("identity.{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_slot_roundtrip() {
        let slot = MemorySlot::new();
        assert_eq!(slot.get("a").unwrap(), None);

        slot.set("a", "1").unwrap();
        assert_eq!(slot.get("a").unwrap().as_deref(), Some("1"));

        slot.remove("a").unwrap();
        slot.remove("a").unwrap();
        assert_eq!(slot.get("a").unwrap(), None);
    }

    #[test]
    fn test_slot_names() {
        assert_eq!(backend_slot("b1"), "backend.b1");
        assert_eq!(identity_slot("i1"), "identity.i1");
    }
}
