//! Code-signing certificates: local identities, backend key layout and the
//! sync engine joining the two.

pub mod engine;
pub mod identity;
pub mod keys;
pub mod security_cli;

pub use engine::{
    CertificateRef, CertificateSecretInfo, CertificateSecretMetadata, CertificateSync,
    SecretLocation,
};
pub use identity::{CredentialStore, LocalSigningIdentity};
pub use keys::{CertificateKeys, sanitize_serial};
pub use security_cli::SecurityCli;
