//! Symmetric crypto used for settings-at-rest and portable backups.
//!
//! - [`aead`]: AES-256-GCM sealing with a `[nonce][tag][ciphertext]` layout
//! - [`keys`]: key material, either persisted in the keychain or derived from
//!   a password with PBKDF2-HMAC-SHA256

pub mod aead;
pub mod keys;

pub use aead::{open, seal};
pub use keys::{KEY_LEN, PersistedKey, SALT_LEN, SymmetricKey, derive_key, generate_salt};
