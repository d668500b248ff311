//! Secrets as files in a local directory.
//!
//! One file per key holding the raw bytes, plus an optional
//! `<key>.meta.json` sidecar. Files are written owner-only.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::secrets::factory::BackendType;
use crate::secrets::manager::{SecretBackend, SecretMetadata};
use crate::secrets::naming::{filter_prefix, restrict};
use crate::settings::BackendConfig;
use crate::utils::restrict_file_permissions;

const META_SUFFIX: &str = ".meta.json";

pub struct FolderBackend {
    root: PathBuf,
}

impl FolderBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let path = config.setting("path").ok_or_else(|| SyncError::MissingSetting {
            backend: config.name.clone(),
            key: "path".into(),
        })?;
        Ok(Self::new(crate::config::expand_tilde(path)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(self.native_key(key))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", self.native_key(key), META_SUFFIX))
    }
}

async fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes).await?;
    restrict_file_permissions(path)
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SecretBackend for FolderBackend {
    fn kind(&self) -> BackendType {
        BackendType::LocalFolder
    }

    fn native_key(&self, key: &str) -> String {
        let name = restrict(
            key,
            |c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'),
            200,
        );
        // No hidden files and no "." / ".." entries.
        match name.strip_prefix('.') {
            Some(rest) => format!("_{}", rest),
            None => name,
        }
    }

    async fn test_connection(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let meta = tokio::fs::metadata(&self.root).await?;
        if meta.permissions().readonly() {
            return Err(SyncError::provider(
                "local_folder",
                format!("{} is read-only", self.root.display()),
            ));
        }
        Ok(())
    }

    async fn store(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&SecretMetadata>,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        write_private(&self.value_path(key), value).await?;

        match metadata {
            Some(meta) => {
                let json = serde_json::to_vec_pretty(meta)?;
                write_private(&self.meta_path(key), &json).await?;
            }
            None => remove_if_present(&self.meta_path(key)).await?,
        }

        debug!(root = %self.root.display(), key, "wrote secret file");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.value_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        remove_if_present(&self.value_path(key)).await?;
        remove_if_present(&self.meta_path(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.value_path(key)).await?)
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(META_SUFFIX) || name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(filter_prefix(names, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FolderBackend::new(dir.path().join("secrets"));

        assert_eq!(backend.get("CERT_1_P12").await.unwrap(), None);
        assert!(backend.list(None).await.unwrap().is_empty());

        let mut meta = SecretMetadata::new();
        meta.insert("common_name".into(), "Apple Distribution".into());
        backend
            .store("CERT_1_P12", &[0, 159, 146, 150], Some(&meta))
            .await
            .unwrap();

        assert_eq!(
            backend.get("CERT_1_P12").await.unwrap(),
            Some(vec![0, 159, 146, 150])
        );
        assert_eq!(backend.list(None).await.unwrap(), vec!["CERT_1_P12"]);
        assert!(backend.exists("CERT_1_P12").await.unwrap());

        backend.delete("CERT_1_P12").await.unwrap();
        backend.delete("CERT_1_P12").await.unwrap();
        assert!(!backend.exists("CERT_1_P12").await.unwrap());
        assert!(backend.list(None).await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let backend = FolderBackend::new(dir.path());
        backend.store("K", b"v", None).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("K"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_list_filters_prefix_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FolderBackend::new(dir.path());
        let meta = SecretMetadata::new();
        backend.store("CERT_A_P12", b"a", Some(&meta)).await.unwrap();
        backend.store("SECRET_TOKEN", b"t", None).await.unwrap();

        assert_eq!(backend.list(Some("cert_")).await.unwrap(), vec!["CERT_A_P12"]);
        assert_eq!(backend.list(None).await.unwrap().len(), 2);
    }

    #[test]
    fn test_native_key_cannot_escape_root() {
        let backend = FolderBackend::new("/tmp/x");
        assert_eq!(backend.native_key("../etc/passwd"), "_._etc_passwd");
        assert_eq!(backend.native_key("."), "_");
    }
}
