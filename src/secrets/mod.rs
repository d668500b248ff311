pub mod factory;
pub mod manager;
pub mod naming;
pub mod providers;
pub mod registry;

pub use factory::{BackendFactory, BackendType, SettingField};
pub use manager::{BackendHandle, DEFAULT_TIMEOUT, SecretBackend, SecretMetadata};
pub use naming::ManagedSecret;
pub use registry::{ActiveBackendChanged, BackendRegistry};
