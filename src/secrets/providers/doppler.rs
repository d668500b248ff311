//! Doppler config secrets over the v3 REST API.
//!
//! Doppler names are environment-variable style, so keys are forced to upper
//! snake case. Values are base64 text. Doppler has no per-secret metadata;
//! metadata passed to `store` is dropped.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::secrets::factory::BackendType;
use crate::secrets::manager::{SecretBackend, SecretMetadata};
use crate::secrets::naming::{filter_prefix, upper_snake};
use crate::settings::BackendConfig;

const PROVIDER: &str = "doppler";
const API_URL: &str = "https://api.doppler.com";

pub struct DopplerBackend {
    client: Client,
    base_url: String,
    token: String,
    project: Option<String>,
    config: Option<String>,
}

#[derive(Deserialize)]
struct SecretResponse {
    value: SecretValue,
}

#[derive(Deserialize)]
struct SecretValue {
    raw: Option<String>,
}

#[derive(Deserialize)]
struct NamesResponse {
    #[serde(default)]
    names: Vec<String>,
}

impl DopplerBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let token = config
            .setting("service_token")
            .ok_or_else(|| SyncError::MissingSetting {
                backend: config.name.clone(),
                key: "service_token".into(),
            })?;

        Ok(Self {
            client: Client::new(),
            base_url: API_URL.to_string(),
            token: token.to_string(),
            project: config.setting("project").map(str::to_string),
            config: config.setting("config").map(str::to_string),
        })
    }

    /// Point the adapter at another API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder.bearer_auth(&self.token);
        // Service tokens are already scoped; project/config only narrow
        // personal tokens.
        if let Some(project) = &self.project {
            builder = builder.query(&[("project", project)]);
        }
        if let Some(config) = &self.config {
            builder = builder.query(&[("config", config)]);
        }
        builder
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = match status {
        StatusCode::UNAUTHORIZED => "invalid service token".to_string(),
        StatusCode::FORBIDDEN => "token lacks access to this config".to_string(),
        StatusCode::NOT_FOUND => "Secret not found".to_string(),
        _ => format!("{}: {}", status, body.trim()),
    };
    Err(SyncError::provider(PROVIDER, message))
}

#[async_trait]
impl SecretBackend for DopplerBackend {
    fn kind(&self) -> BackendType {
        BackendType::Doppler
    }

    fn native_key(&self, key: &str) -> String {
        upper_snake(key)
    }

    async fn test_connection(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.url("/v3/me"))
            .bearer_auth(&self.token)
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
        if metadata.is_some() {
            debug!(key, "doppler has no secret metadata, skipping");
        }

        let mut body = json!({
            "secrets": { self.native_key(key): BASE64.encode(value) }
        });
        if let Some(project) = &self.project {
            body["project"] = json!(project);
        }
        if let Some(config) = &self.config {
            body["config"] = json!(config);
        }

        let resp = self
            .client
            .post(self.url("/v3/configs/config/secrets"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .authed(self.client.get(self.url("/v3/configs/config/secret")))
            .query(&[("name", self.native_key(key))])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let secret: SecretResponse = check(resp).await?.json().await?;
        match secret.value.raw {
            None => Ok(None),
            Some(raw) => BASE64
                .decode(raw.trim())
                .map(Some)
                .map_err(|e| SyncError::provider(PROVIDER, format!("value is not base64: {}", e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .authed(self.client.delete(self.url("/v3/configs/config/secret")))
            .query(&[("name", self.native_key(key))])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp).await?;
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let resp = self
            .authed(self.client.get(self.url("/v3/configs/config/secrets/names")))
            .send()
            .await?;
        let listed: NamesResponse = check(resp).await?.json().await?;
        // Doppler injects DOPPLER_* bookkeeping names into every config.
        let names = listed
            .names
            .into_iter()
            .filter(|n| !n.starts_with("DOPPLER_"))
            .collect();
        Ok(filter_prefix(names, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_key_is_env_style() {
        let config = BackendConfig::new("Doppler", BackendType::Doppler)
            .with_setting("service_token", "dp.st.x");
        let backend = DopplerBackend::from_config(&config).unwrap();
        assert_eq!(backend.native_key("CERT_0A1_P12"), "CERT_0A1_P12");
        assert_eq!(backend.native_key("secret.token"), "SECRET_TOKEN");
        assert_eq!(backend.native_key("1x"), "S_1X");
    }
}
