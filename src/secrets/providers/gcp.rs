use async_trait::async_trait;
use google_cloud_gax::paginator::ItemPaginator as _;
use google_cloud_secretmanager_v1::client::SecretManagerService;
use google_cloud_secretmanager_v1::model::{Replication, Secret, SecretPayload, replication};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::secrets::factory::BackendType;
use crate::secrets::manager::{SecretBackend, SecretMetadata};
use crate::secrets::naming::{filter_prefix, restrict};
use crate::settings::BackendConfig;

/// Google Cloud Secret Manager. Values are stored as raw payload bytes, one
/// version per store; reads access `latest`. Metadata becomes annotations on
/// first creation.
pub struct GcpBackend {
    project_id: String,
    client: OnceCell<SecretManagerService>,
}

impl GcpBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let project_id = config
            .setting("project_id")
            .ok_or_else(|| SyncError::MissingSetting {
                backend: config.name.clone(),
                key: "project_id".into(),
            })?;
        Ok(Self {
            project_id: project_id.to_string(),
            client: OnceCell::new(),
        })
    }

    async fn client(&self) -> Result<&SecretManagerService> {
        self.client
            .get_or_try_init(|| async {
                debug!(project = %self.project_id, "building Secret Manager client");
                SecretManagerService::builder()
                    .build()
                    .await
                    .map_err(SyncError::gcp)
            })
            .await
    }

    /// `projects/{project_id}`
    fn parent(&self) -> String {
        format!("projects/{}", self.project_id)
    }

    /// `projects/{project_id}/secrets/{secret_id}`
    fn secret_name(&self, key: &str) -> String {
        format!("{}/secrets/{}", self.parent(), self.native_key(key))
    }

    /// `projects/my-project/secrets/my-secret` -> `my-secret`
    fn short_name(full_name: &str) -> &str {
        match full_name.rfind("/secrets/") {
            Some(idx) => &full_name[idx + "/secrets/".len()..],
            None => full_name.rsplit('/').next().unwrap_or(full_name),
        }
    }
}

#[async_trait]
impl SecretBackend for GcpBackend {
    fn kind(&self) -> BackendType {
        BackendType::GcpSecretManager
    }

    fn native_key(&self, key: &str) -> String {
        restrict(
            key,
            |c| c.is_ascii_alphanumeric() || c == '_' || c == '-',
            255,
        )
    }

    async fn test_connection(&self) -> Result<()> {
        let mut items = self
            .client()
            .await?
            .list_secrets()
            .set_parent(self.parent())
            .set_page_size(1)
            .by_item();
        if let Some(item) = items.next().await {
            item.map_err(SyncError::gcp)?;
        }
        Ok(())
    }

    async fn store(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&SecretMetadata>,
    ) -> Result<()> {
        let client = self.client().await?;

        // The secret container must exist before a version can be added.
        let mut secret = Secret::default()
            .set_replication(Replication::default().set_automatic(replication::Automatic::default()));
        if let Some(meta) = metadata {
            secret = secret.set_annotations(meta.clone());
        }
        if let Err(e) = client
            .create_secret()
            .set_parent(self.parent())
            .set_secret_id(self.native_key(key))
            .set_secret(secret)
            .send()
            .await
        {
            let err = SyncError::gcp(e);
            if !err.to_string().contains("already exists") {
                return Err(err);
            }
        }

        let payload = SecretPayload::default().set_data(bytes::Bytes::copy_from_slice(value));
        client
            .add_secret_version()
            .set_parent(self.secret_name(key))
            .set_payload(payload)
            .send()
            .await
            .map_err(SyncError::gcp)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .client()
            .await?
            .access_secret_version()
            .set_name(format!("{}/versions/latest", self.secret_name(key)))
            .send()
            .await;

        match result {
            Ok(resp) => Ok(resp.payload.map(|p| p.data.to_vec())),
            Err(e) => {
                let err = SyncError::gcp(e);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let result = self
            .client()
            .await?
            .delete_secret()
            .set_name(self.secret_name(key))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = SyncError::gcp(e);
                if err.is_not_found() { Ok(()) } else { Err(err) }
            }
        }
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut items = self
            .client()
            .await?
            .list_secrets()
            .set_parent(self.parent())
            .by_item();

        let mut names = Vec::new();
        while let Some(item) = items.next().await {
            let secret = item.map_err(SyncError::gcp)?;
            if !secret.name.is_empty() {
                names.push(Self::short_name(&secret.name).to_string());
            }
        }
        Ok(filter_prefix(names, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names() {
        let config = BackendConfig::new("GCP", BackendType::GcpSecretManager)
            .with_setting("project_id", "acme");
        let backend = GcpBackend::from_config(&config).unwrap();
        assert_eq!(
            backend.secret_name("CERT_1.P12"),
            "projects/acme/secrets/CERT_1_P12"
        );
        assert_eq!(
            GcpBackend::short_name("projects/acme/secrets/CERT_1_P12"),
            "CERT_1_P12"
        );
    }
}
