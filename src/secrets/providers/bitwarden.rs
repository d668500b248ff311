//! Bitwarden Secrets Manager via the official SDK.
//!
//! The SDK addresses secrets by UUID, so every keyed operation starts with a
//! project-scoped listing to resolve key -> id. Values are base64 text and
//! metadata is kept as JSON in the secret's note.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitwarden::{
    Client, ClientSettings, DeviceType,
    auth::login::AccessTokenLoginRequest,
    secrets_manager::{
        ClientProjectsExt, ClientSecretsExt,
        projects::ProjectGetRequest,
        secrets::{
            SecretCreateRequest, SecretGetRequest, SecretIdentifiersByProjectRequest,
            SecretPutRequest, SecretsDeleteRequest,
        },
    },
};
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::secrets::factory::BackendType;
use crate::secrets::manager::{SecretBackend, SecretMetadata};
use crate::secrets::naming::filter_prefix;
use crate::settings::BackendConfig;

const PROVIDER: &str = "bitwarden";

pub struct BitwardenBackend {
    access_token: String,
    organization_id: Uuid,
    project_id: Uuid,
    client: OnceCell<Client>,
}

fn sdk_err(e: impl std::fmt::Display) -> SyncError {
    SyncError::provider(PROVIDER, e.to_string())
}

fn parse_uuid(config: &BackendConfig, key: &str) -> Result<Uuid> {
    let raw = config.setting(key).ok_or_else(|| SyncError::MissingSetting {
        backend: config.name.clone(),
        key: key.to_string(),
    })?;
    Uuid::parse_str(raw)
        .map_err(|e| SyncError::validation(format!("invalid {} '{}': {}", key, raw, e)))
}

impl BitwardenBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let access_token = config
            .setting("access_token")
            .ok_or_else(|| SyncError::MissingSetting {
                backend: config.name.clone(),
                key: "access_token".into(),
            })?
            .to_string();

        Ok(Self {
            access_token,
            organization_id: parse_uuid(config, "organization_id")?,
            project_id: parse_uuid(config, "project_id")?,
            client: OnceCell::new(),
        })
    }

    /// Log in on first use.
    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                let settings = ClientSettings {
                    device_type: DeviceType::SDK,
                    user_agent: format!("certsync/{}", env!("CARGO_PKG_VERSION")),
                    bitwarden_client_version: Some(env!("CARGO_PKG_VERSION").to_string()),
                    ..Default::default()
                };
                let client = Client::new(Some(settings));
                let request = AccessTokenLoginRequest {
                    access_token: self.access_token.clone(),
                    state_file: None,
                };
                client
                    .auth()
                    .login_access_token(&request)
                    .await
                    .map_err(sdk_err)?;
                debug!(project = %self.project_id, "bitwarden login succeeded");
                Ok::<_, SyncError>(client)
            })
            .await
    }

    /// `(id, key)` pairs for every secret in the project.
    async fn identifiers(&self) -> Result<Vec<(Uuid, String)>> {
        let request = SecretIdentifiersByProjectRequest {
            project_id: self.project_id,
        };
        let response = self
            .client()
            .await?
            .secrets()
            .list_by_project(&request)
            .await
            .map_err(sdk_err)?;
        Ok(response.data.into_iter().map(|s| (s.id, s.key)).collect())
    }

    async fn find_id(&self, key: &str) -> Result<Option<Uuid>> {
        Ok(self
            .identifiers()
            .await?
            .into_iter()
            .find(|(_, k)| k == key)
            .map(|(id, _)| id))
    }
}

#[async_trait]
impl SecretBackend for BitwardenBackend {
    fn kind(&self) -> BackendType {
        BackendType::BitwardenSecretsManager
    }

    async fn test_connection(&self) -> Result<()> {
        let request = ProjectGetRequest {
            id: self.project_id,
        };
        self.client()
            .await?
            .projects()
            .get(&request)
            .await
            .map_err(sdk_err)?;
        Ok(())
    }

    async fn store(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&SecretMetadata>,
    ) -> Result<()> {
        let note = match metadata {
            Some(meta) => serde_json::to_string(meta)?,
            None => String::new(),
        };
        let encoded = BASE64.encode(value);
        let client = self.client().await?;

        match self.find_id(key).await? {
            Some(id) => {
                let request = SecretPutRequest {
                    id,
                    organization_id: self.organization_id,
                    project_ids: Some(vec![self.project_id]),
                    key: key.to_string(),
                    value: encoded,
                    note,
                };
                client.secrets().update(&request).await.map_err(sdk_err)?;
            }
            None => {
                let request = SecretCreateRequest {
                    organization_id: self.organization_id,
                    project_ids: Some(vec![self.project_id]),
                    key: key.to_string(),
                    value: encoded,
                    note,
                };
                client.secrets().create(&request).await.map_err(sdk_err)?;
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(id) = self.find_id(key).await? else {
            return Ok(None);
        };
        let secret = self
            .client()
            .await?
            .secrets()
            .get(&SecretGetRequest { id })
            .await
            .map_err(sdk_err)?;
        BASE64
            .decode(secret.value.trim())
            .map(Some)
            .map_err(|e| SyncError::provider(PROVIDER, format!("value is not base64: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let Some(id) = self.find_id(key).await? else {
            return Ok(());
        };
        self.client()
            .await?
            .secrets()
            .delete(SecretsDeleteRequest { ids: vec![id] })
            .await
            .map_err(sdk_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.find_id(key).await?.is_some())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let keys = self.identifiers().await?.into_iter().map(|(_, k)| k).collect();
        Ok(filter_prefix(keys, prefix))
    }
}
