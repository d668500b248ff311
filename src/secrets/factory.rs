//! Backend type metadata and the switch-on-type constructor.
//!
//! Nothing here touches the network or spawns processes: SDK clients are
//! built lazily by the adapters on first use.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::manager::SecretBackend;
use super::providers::{
    AwsBackend, BitwardenBackend, DopplerBackend, FolderBackend, GcpBackend, OnePasswordBackend,
    VaultBackend,
};
use crate::error::{Result, SyncError};
use crate::settings::BackendConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    None,
    AwsSecretsManager,
    GcpSecretManager,
    BitwardenSecretsManager,
    HashicorpVault,
    Doppler,
    OnepasswordCli,
    LocalFolder,
}

impl BackendType {
    pub const ALL: [BackendType; 8] = [
        BackendType::None,
        BackendType::AwsSecretsManager,
        BackendType::GcpSecretManager,
        BackendType::BitwardenSecretsManager,
        BackendType::HashicorpVault,
        BackendType::Doppler,
        BackendType::OnepasswordCli,
        BackendType::LocalFolder,
    ];

    /// The snake_case tag used in settings and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendType::None => "none",
            BackendType::AwsSecretsManager => "aws_secrets_manager",
            BackendType::GcpSecretManager => "gcp_secret_manager",
            BackendType::BitwardenSecretsManager => "bitwarden_secrets_manager",
            BackendType::HashicorpVault => "hashicorp_vault",
            BackendType::Doppler => "doppler",
            BackendType::OnepasswordCli => "onepassword_cli",
            BackendType::LocalFolder => "local_folder",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        // Short aliases accepted on the command line.
        let normalized = match normalized.as_str() {
            "aws" => "aws_secrets_manager",
            "gcp" => "gcp_secret_manager",
            "bitwarden" | "bws" => "bitwarden_secrets_manager",
            "vault" => "hashicorp_vault",
            "1password" | "onepassword" | "op" => "onepassword_cli",
            "folder" | "local" => "local_folder",
            other => other,
        };
        BackendType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| SyncError::validation(format!("unknown backend type '{}'", s)))
    }
}

/// One configurable setting of a backend type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingField {
    pub key: &'static str,
    pub label: &'static str,
    pub is_secret: bool,
    pub is_required: bool,
    pub default_value: Option<&'static str>,
    pub placeholder: &'static str,
}

const fn field(key: &'static str, label: &'static str, placeholder: &'static str) -> SettingField {
    SettingField {
        key,
        label,
        is_secret: false,
        is_required: false,
        default_value: None,
        placeholder,
    }
}

impl SettingField {
    const fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    const fn secret(mut self) -> Self {
        self.is_secret = true;
        self
    }

    const fn with_default(mut self, value: &'static str) -> Self {
        self.default_value = Some(value);
        self
    }
}

const AWS_FIELDS: &[SettingField] = &[
    field("region", "Region", "us-west-2").required(),
    field("profile", "Profile", "default"),
    field("access_key_id", "Access key id", "AKIA...").secret(),
    field("secret_access_key", "Secret access key", "").secret(),
];

const GCP_FIELDS: &[SettingField] = &[field("project_id", "Project id", "my-project").required()];

const BITWARDEN_FIELDS: &[SettingField] = &[
    field("access_token", "Access token", "0.xxxx...").required().secret(),
    field("organization_id", "Organization id", "uuid").required(),
    field("project_id", "Project id", "uuid").required(),
];

const VAULT_FIELDS: &[SettingField] = &[
    field("address", "Address", "https://vault.example.com:8200").required(),
    field("token", "Token", "hvs....").secret(),
    field("role_id", "AppRole role id", ""),
    field("secret_id", "AppRole secret id", "").secret(),
    field("mount", "KV mount", "secret").with_default("secret"),
    field("path_prefix", "Path prefix", "certsync").with_default("certsync"),
];

const DOPPLER_FIELDS: &[SettingField] = &[
    field("service_token", "Service token", "dp.st....").required().secret(),
    field("project", "Project", ""),
    field("config", "Config", "prd"),
];

const ONEPASSWORD_FIELDS: &[SettingField] = &[
    field("vault", "Vault", "Private").required(),
    field("item_title", "Item title", "certsync").with_default("certsync"),
    field("account", "Account", "my.1password.com"),
    field("service_account_token", "Service account token", "ops_...").secret(),
];

const FOLDER_FIELDS: &[SettingField] = &[field("path", "Folder", "~/certsync-secrets").required()];

/// Metadata lookups and instance construction per [`BackendType`].
pub struct BackendFactory;

impl BackendFactory {
    /// Build an adapter for `config`. Fails with `MissingSetting` when a
    /// required key is absent or empty.
    pub fn create_instance(config: &BackendConfig) -> Result<Box<dyn SecretBackend>> {
        Self::validate(config)?;

        let backend: Box<dyn SecretBackend> = match config.backend_type {
            BackendType::None => {
                return Err(SyncError::unsupported(
                    "backend type 'none' has no implementation",
                ));
            }
            BackendType::AwsSecretsManager => Box::new(AwsBackend::from_config(config)?),
            BackendType::GcpSecretManager => Box::new(GcpBackend::from_config(config)?),
            BackendType::BitwardenSecretsManager => {
                Box::new(BitwardenBackend::from_config(config)?)
            }
            BackendType::HashicorpVault => Box::new(VaultBackend::from_config(config)?),
            BackendType::Doppler => Box::new(DopplerBackend::from_config(config)?),
            BackendType::OnepasswordCli => Box::new(OnePasswordBackend::from_config(config)?),
            BackendType::LocalFolder => Box::new(FolderBackend::from_config(config)?),
        };
        Ok(backend)
    }

    /// Types that can be instantiated.
    pub fn supported_types() -> Vec<BackendType> {
        BackendType::ALL
            .into_iter()
            .filter(|t| *t != BackendType::None)
            .collect()
    }

    pub fn required_settings(backend_type: BackendType) -> &'static [SettingField] {
        match backend_type {
            BackendType::None => &[],
            BackendType::AwsSecretsManager => AWS_FIELDS,
            BackendType::GcpSecretManager => GCP_FIELDS,
            BackendType::BitwardenSecretsManager => BITWARDEN_FIELDS,
            BackendType::HashicorpVault => VAULT_FIELDS,
            BackendType::Doppler => DOPPLER_FIELDS,
            BackendType::OnepasswordCli => ONEPASSWORD_FIELDS,
            BackendType::LocalFolder => FOLDER_FIELDS,
        }
    }

    pub fn display_name(backend_type: BackendType) -> &'static str {
        match backend_type {
            BackendType::None => "None",
            BackendType::AwsSecretsManager => "AWS Secrets Manager",
            BackendType::GcpSecretManager => "Google Cloud Secret Manager",
            BackendType::BitwardenSecretsManager => "Bitwarden Secrets Manager",
            BackendType::HashicorpVault => "HashiCorp Vault",
            BackendType::Doppler => "Doppler",
            BackendType::OnepasswordCli => "1Password (CLI)",
            BackendType::LocalFolder => "Local folder",
        }
    }

    pub fn is_secret_setting(backend_type: BackendType, key: &str) -> bool {
        Self::required_settings(backend_type)
            .iter()
            .any(|f| f.key == key && f.is_secret)
    }

    /// Split a settings map into `(secret, plain)` halves.
    pub fn split_settings(
        backend_type: BackendType,
        settings: &BTreeMap<String, String>,
    ) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(k, _)| Self::is_secret_setting(backend_type, k))
    }

    /// Check that every required key has a non-empty value.
    pub fn validate(config: &BackendConfig) -> Result<()> {
        for field in Self::required_settings(config.backend_type) {
            if field.is_required && config.setting(field.key).is_none() {
                return Err(SyncError::MissingSetting {
                    backend: config.name.clone(),
                    key: field.key.to_string(),
                });
            }
        }
        Ok(())
    }
}
