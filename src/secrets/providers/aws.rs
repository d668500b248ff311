use async_trait::async_trait;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_sdk_secretsmanager::Client;
use aws_sdk_secretsmanager::config::{Credentials, Region};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::secrets::factory::BackendType;
use crate::secrets::manager::{SecretBackend, SecretMetadata};
use crate::secrets::naming::{filter_prefix, restrict};
use crate::settings::BackendConfig;

/// AWS Secrets Manager. Values are base64 in `SecretString`; metadata is JSON
/// in the secret description.
pub struct AwsBackend {
    region: String,
    profile: Option<String>,
    static_credentials: Option<(String, String)>,
    client: OnceCell<Client>,
}

impl AwsBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let region = config
            .setting("region")
            .ok_or_else(|| SyncError::MissingSetting {
                backend: config.name.clone(),
                key: "region".into(),
            })?
            .to_string();

        let static_credentials = match (
            config.setting("access_key_id"),
            config.setting("secret_access_key"),
        ) {
            (Some(id), Some(secret)) => Some((id.to_string(), secret.to_string())),
            (None, None) => None,
            _ => {
                return Err(SyncError::validation(
                    "access_key_id and secret_access_key must be set together",
                ));
            }
        };

        Ok(Self {
            region,
            profile: config.setting("profile").map(str::to_string),
            static_credentials,
            client: OnceCell::new(),
        })
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let mut loader = aws_config::from_env().region(Region::new(self.region.clone()));

                // Explicit credentials win over the profile, which wins over
                // the default chain.
                if let Some((id, secret)) = &self.static_credentials {
                    loader = loader.credentials_provider(Credentials::new(
                        id.clone(),
                        secret.clone(),
                        None,
                        None,
                        "certsync",
                    ));
                } else if let Some(profile) = &self.profile {
                    let provider = ProfileFileCredentialsProvider::builder()
                        .profile_name(profile)
                        .build();
                    loader = loader.profile_name(profile).credentials_provider(provider);
                }

                debug!(region = %self.region, "building AWS Secrets Manager client");
                Client::new(&loader.load().await)
            })
            .await
    }
}

#[async_trait]
impl SecretBackend for AwsBackend {
    fn kind(&self) -> BackendType {
        BackendType::AwsSecretsManager
    }

    fn native_key(&self, key: &str) -> String {
        restrict(
            key,
            |c| c.is_ascii_alphanumeric() || "/_+=.@-".contains(c),
            512,
        )
    }

    async fn test_connection(&self) -> Result<()> {
        self.client()
            .await
            .list_secrets()
            .max_results(1)
            .send()
            .await
            .map_err(|e| SyncError::aws(e.into_service_error()))?;
        Ok(())
    }

    async fn store(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&SecretMetadata>,
    ) -> Result<()> {
        let name = self.native_key(key);
        let encoded = BASE64.encode(value);
        let description = metadata.map(serde_json::to_string).transpose()?;
        let client = self.client().await;

        let mut create = client
            .create_secret()
            .name(&name)
            .secret_string(&encoded);
        if let Some(desc) = &description {
            create = create.description(desc);
        }

        match create.send().await {
            Ok(_) => Ok(()),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_exists_exception()) =>
            {
                client
                    .put_secret_value()
                    .secret_id(&name)
                    .secret_string(&encoded)
                    .send()
                    .await
                    .map_err(|e| SyncError::aws(e.into_service_error()))?;
                if let Some(desc) = description {
                    client
                        .update_secret()
                        .secret_id(&name)
                        .description(desc)
                        .send()
                        .await
                        .map_err(|e| SyncError::aws(e.into_service_error()))?;
                }
                Ok(())
            }
            Err(e) => Err(SyncError::aws(e.into_service_error())),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = match self
            .client()
            .await
            .get_secret_value()
            .secret_id(self.native_key(key))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(SyncError::aws(e.into_service_error())),
        };

        if let Some(text) = resp.secret_string() {
            return BASE64
                .decode(text.trim())
                .map(Some)
                .map_err(|e| SyncError::provider("aws", format!("value is not base64: {}", e)));
        }
        Ok(resp.secret_binary().map(|blob| blob.as_ref().to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self
            .client()
            .await
            .delete_secret()
            .secret_id(self.native_key(key))
            .force_delete_without_recovery(true)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                Ok(())
            }
            Err(e) => Err(SyncError::aws(e.into_service_error())),
        }
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut stream = self
            .client()
            .await
            .list_secrets()
            .into_paginator()
            .send();

        let mut names = Vec::new();
        while let Some(page) = stream.next().await {
            let page = page.map_err(|e| SyncError::aws(e.into_service_error()))?;
            names.extend(
                page.secret_list()
                    .iter()
                    .filter_map(|s| s.name().map(str::to_string)),
            );
        }
        Ok(filter_prefix(names, prefix))
    }
}
