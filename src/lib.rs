//! certsync - keep code-signing certificates in sync between the local
//! keychain and a pluggable secret backend.
//!
//! This crate provides:
//! - An encrypted settings store keyed by a keychain-held master key
//! - Secret backends (AWS, GCP, Bitwarden, Vault, Doppler, 1Password CLI,
//!   local folder) behind one async trait, with a registry for the active one
//! - A certificate sync engine that reconciles local identities with the
//!   backend and moves PKCS#12 bundles in either direction
//! - Password-protected portable backups of the settings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use certsync::keychain::{KeyringSlot, SecretSlot};
//! use certsync::{BackendRegistry, SettingsStore};
//!
//! #[tokio::main]
//! async fn main() -> certsync::Result<()> {
//!     let slot: Arc<dyn SecretSlot> = Arc::new(KeyringSlot::new("certsync"));
//!     let settings = Arc::new(SettingsStore::in_dir("/tmp/certsync".as_ref(), slot));
//!     let registry = BackendRegistry::open(settings).await?;
//!
//!     for config in registry.configs().await {
//!         println!("{} ({})", config.name, config.backend_type);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod certificates;
pub mod cli;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keychain;
pub mod logging;
pub mod secrets;
pub mod settings;
pub mod utils;

// Re-export commonly used types at the crate root
pub use certificates::{CertificateSync, CredentialStore, SecretLocation};
pub use config::Config;
pub use error::{Result, SyncError};
pub use secrets::{BackendFactory, BackendRegistry, BackendType, SecretBackend};
pub use settings::{SettingsDocument, SettingsStore};
