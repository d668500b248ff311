//! HashiCorp Vault KV version 2 over its HTTP API.
//!
//! Secrets live at `<mount>/data/<path_prefix>/<key>` with the base64 value
//! under `data.value`. Metadata goes to the key's `custom_metadata`.
//! Authentication is a static token or an AppRole login whose client token
//! is cached for the lifetime of the adapter.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::secrets::factory::BackendType;
use crate::secrets::manager::{SecretBackend, SecretMetadata};
use crate::secrets::naming::{filter_prefix, restrict};
use crate::settings::BackendConfig;

const PROVIDER: &str = "vault";

enum Auth {
    Token(String),
    AppRole { role_id: String, secret_id: String },
}

pub struct VaultBackend {
    client: Client,
    address: String,
    mount: String,
    path_prefix: String,
    auth: Auth,
    token: OnceCell<String>,
}

#[derive(Deserialize)]
struct ReadResponse {
    data: ReadData,
}

#[derive(Deserialize)]
struct ReadData {
    data: std::collections::HashMap<String, String>,
}

#[derive(Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Deserialize)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
}

impl VaultBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let address = config
            .setting("address")
            .ok_or_else(|| missing(config, "address"))?
            .trim_end_matches('/')
            .to_string();

        let auth = match (
            config.setting("token"),
            config.setting("role_id"),
            config.setting("secret_id"),
        ) {
            (Some(token), _, _) => Auth::Token(token.to_string()),
            (None, Some(role_id), Some(secret_id)) => Auth::AppRole {
                role_id: role_id.to_string(),
                secret_id: secret_id.to_string(),
            },
            _ => return Err(missing(config, "token")),
        };

        Ok(Self {
            client: Client::new(),
            address,
            mount: config
                .setting("mount")
                .unwrap_or("secret")
                .trim_matches('/')
                .to_string(),
            path_prefix: config
                .setting("path_prefix")
                .unwrap_or("certsync")
                .trim_matches('/')
                .to_string(),
            auth,
            token: OnceCell::new(),
        })
    }

    fn data_url(&self, key: &str) -> String {
        format!(
            "{}/v1/{}/data/{}/{}",
            self.address,
            self.mount,
            self.path_prefix,
            self.native_key(key)
        )
    }

    fn metadata_url(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => format!(
                "{}/v1/{}/metadata/{}/{}",
                self.address,
                self.mount,
                self.path_prefix,
                self.native_key(key)
            ),
            None => format!(
                "{}/v1/{}/metadata/{}",
                self.address, self.mount, self.path_prefix
            ),
        }
    }

    async fn token(&self) -> Result<&str> {
        let token = self
            .token
            .get_or_try_init(|| async {
                match &self.auth {
                    Auth::Token(token) => Ok::<_, SyncError>(token.clone()),
                    Auth::AppRole { role_id, secret_id } => {
                        debug!(address = %self.address, "logging in with AppRole");
                        let resp = self
                            .client
                            .post(format!("{}/v1/auth/approle/login", self.address))
                            .json(&json!({ "role_id": role_id, "secret_id": secret_id }))
                            .send()
                            .await?;
                        let login: LoginResponse = check(resp).await?.json().await?;
                        Ok::<_, SyncError>(login.auth.client_token)
                    }
                }
            })
            .await?;
        Ok(token.as_str())
    }

    async fn request(&self, method: Method, url: String) -> Result<reqwest::RequestBuilder> {
        let token = self.token().await?;
        Ok(self
            .client
            .request(method, url)
            .header("X-Vault-Token", token))
    }
}

fn missing(config: &BackendConfig, key: &str) -> SyncError {
    SyncError::MissingSetting {
        backend: config.name.clone(),
        key: key.to_string(),
    }
}

/// Map a non-success response to a provider error carrying Vault's message.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = match status {
        StatusCode::FORBIDDEN => "permission denied (check token policies)".to_string(),
        StatusCode::NOT_FOUND => "Secret not found".to_string(),
        _ => format!("{}: {}", status, body.trim()),
    };
    Err(SyncError::provider(PROVIDER, message))
}

#[async_trait]
impl SecretBackend for VaultBackend {
    fn kind(&self) -> BackendType {
        BackendType::HashicorpVault
    }

    fn native_key(&self, key: &str) -> String {
        restrict(
            key,
            |c| c.is_ascii_alphanumeric() || c == '_' || c == '-',
            255,
        )
    }

    async fn test_connection(&self) -> Result<()> {
        let resp = self
            .request(
                Method::GET,
                format!("{}/v1/auth/token/lookup-self", self.address),
            )
            .await?
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn store(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&SecretMetadata>,
    ) -> Result<()> {
        let body = json!({ "data": { "value": BASE64.encode(value) } });
        let resp = self
            .request(Method::POST, self.data_url(key))
            .await?
            .json(&body)
            .send()
            .await?;
        check(resp).await?;

        if let Some(meta) = metadata {
            let resp = self
                .request(Method::POST, self.metadata_url(Some(key)))
                .await?
                .json(&json!({ "custom_metadata": meta }))
                .send()
                .await?;
            check(resp).await?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .request(Method::GET, self.data_url(key))
            .await?
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let read: ReadResponse = check(resp).await?.json().await?;
        let Some(encoded) = read.data.data.get("value") else {
            return Ok(None);
        };
        BASE64
            .decode(encoded)
            .map(Some)
            .map_err(|e| SyncError::provider(PROVIDER, format!("value is not base64: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .request(Method::DELETE, self.metadata_url(Some(key)))
            .await?
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp).await?;
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let list = Method::from_bytes(b"LIST")
            .map_err(|e| SyncError::provider(PROVIDER, e.to_string()))?;
        let resp = self
            .request(list, self.metadata_url(None))
            .await?
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let listed: ListResponse = check(resp).await?.json().await?;
        let keys = listed
            .data
            .keys
            .into_iter()
            .filter(|k| !k.ends_with('/'))
            .collect();
        Ok(filter_prefix(keys, prefix))
    }
}
