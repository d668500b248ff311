//! Concrete [`SecretBackend`](super::SecretBackend) adapters, one per
//! [`BackendType`](super::BackendType) variant.

mod aws;
mod bitwarden;
mod doppler;
mod folder;
mod gcp;
mod onepassword;
mod vault;

pub use aws::AwsBackend;
pub use bitwarden::BitwardenBackend;
pub use doppler::DopplerBackend;
pub use folder::FolderBackend;
pub use gcp::GcpBackend;
pub use onepassword::OnePasswordBackend;
pub use vault::VaultBackend;
