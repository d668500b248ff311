//! The uniform secret interface every backend implements, and the handle the
//! rest of certsync talks to.
//!
//! [`SecretBackend`] is the adapter boundary: implementations return
//! `Result`, with "not found" already translated to `Ok(None)` / `Ok(false)`.
//! [`BackendHandle`] wraps one instance with a timeout and a cancellation
//! token and folds every transport failure into the boolean / optional result
//! shape callers expect.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::factory::BackendType;
use crate::error::{Result, SyncError};

/// Free-form annotations stored alongside a secret where the backend allows.
pub type SecretMetadata = BTreeMap<String, String>;

/// Default bound for a single remote call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait SecretBackend: Send + Sync {
    fn kind(&self) -> BackendType;

    /// Map a logical key to the name this backend stores it under.
    fn native_key(&self, key: &str) -> String {
        key.to_string()
    }

    /// Cheap reachability and auth probe.
    async fn test_connection(&self) -> Result<()>;

    /// Create or overwrite `key`.
    async fn store(&self, key: &str, value: &[u8], metadata: Option<&SecretMetadata>)
    -> Result<()>;

    /// `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Backend-native key names, optionally filtered by a case-insensitive
    /// prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>>;
}

/// A live backend instance bound to the config it was built from.
pub struct BackendHandle {
    backend_id: String,
    backend: Box<dyn SecretBackend>,
    timeout: Duration,
}

impl BackendHandle {
    pub fn new(backend_id: impl Into<String>, backend: Box<dyn SecretBackend>) -> Self {
        Self {
            backend_id: backend_id.into(),
            backend,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Id of the backend config this instance was created from.
    pub fn id(&self) -> &str {
        &self.backend_id
    }

    pub fn kind(&self) -> BackendType {
        self.backend.kind()
    }

    pub fn native_key(&self, key: &str) -> String {
        self.backend.native_key(key)
    }

    /// Run one backend call under the timeout, racing the cancel token.
    /// Timeouts surface as an ordinary provider failure.
    async fn run<T, F>(&self, op: &'static str, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(backend = %self.backend_id, op, "cancelled");
                Err(SyncError::Cancelled)
            }
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(SyncError::provider(
                    self.kind().as_str(),
                    format!("{} timed out after {}s", op, self.timeout.as_secs()),
                )),
            },
        }
    }

    pub async fn test_connection(&self, cancel: &CancellationToken) -> bool {
        match self
            .run("test_connection", cancel, self.backend.test_connection())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = %self.backend_id, error = %e, "connection test failed");
                false
            }
        }
    }

    pub async fn store_secret(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&SecretMetadata>,
        cancel: &CancellationToken,
    ) -> bool {
        match self
            .run("store", cancel, self.backend.store(key, value, metadata))
            .await
        {
            Ok(()) => {
                debug!(backend = %self.backend_id, key, "stored secret");
                true
            }
            Err(e) => {
                warn!(backend = %self.backend_id, key, error = %e, "store failed");
                false
            }
        }
    }

    /// `None` both for an absent key and for a failed call; failures are
    /// logged.
    pub async fn get_secret(&self, key: &str, cancel: &CancellationToken) -> Option<Vec<u8>> {
        match self.run("get", cancel, self.backend.get(key)).await {
            Ok(value) => value,
            Err(e) => {
                warn!(backend = %self.backend_id, key, error = %e, "get failed");
                None
            }
        }
    }

    pub async fn delete_secret(&self, key: &str, cancel: &CancellationToken) -> bool {
        match self.run("delete", cancel, self.backend.delete(key)).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!(backend = %self.backend_id, key, error = %e, "delete failed");
                false
            }
        }
    }

    pub async fn secret_exists(&self, key: &str, cancel: &CancellationToken) -> bool {
        match self.run("exists", cancel, self.backend.exists(key)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(backend = %self.backend_id, key, error = %e, "exists check failed");
                false
            }
        }
    }

    /// Listing keeps its error so callers can tell "empty" from "unreachable".
    pub async fn list_secrets(
        &self,
        prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.run("list", cancel, self.backend.list(prefix)).await
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("backend_id", &self.backend_id)
            .field("kind", &self.kind())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    #[async_trait]
    impl SecretBackend for Stalled {
        fn kind(&self) -> BackendType {
            BackendType::LocalFolder
        }

        async fn test_connection(&self) -> Result<()> {
            futures::future::pending().await
        }

        async fn store(&self, _: &str, _: &[u8], _: Option<&SecretMetadata>) -> Result<()> {
            futures::future::pending().await
        }

        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
            futures::future::pending().await
        }

        async fn delete(&self, _: &str) -> Result<()> {
            Err(SyncError::not_found("gone"))
        }

        async fn list(&self, _: Option<&str>) -> Result<Vec<String>> {
            futures::future::pending().await
        }
    }

    fn handle() -> BackendHandle {
        BackendHandle::new("stalled", Box::new(Stalled)).with_timeout(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_timeout_is_plain_failure() {
        let cancel = CancellationToken::new();
        let handle = handle();
        assert!(!handle.test_connection(&cancel).await);
        assert!(!handle.store_secret("K", b"v", None, &cancel).await);
        assert_eq!(handle.get_secret("K", &cancel).await, None);

        let err = handle.list_secrets(None, &cancel).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = handle().list_secrets(None, &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        assert!(handle().delete_secret("K", &CancellationToken::new()).await);
    }
}
