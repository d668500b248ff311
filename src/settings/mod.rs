//! The encrypted settings document and its store.

mod model;
mod store;

pub use model::{
    BackendConfig, Identity, IdentityKind, Platform, Preferences, PublisherConfig,
    SCHEMA_VERSION, SettingsDocument,
};
pub use store::{SettingsChanged, SettingsStore};
