mod common;

use tokio_util::sync::CancellationToken;

use certsync::error::SyncError;
use certsync::keychain::{SecretSlot, backend_slot};
use certsync::secrets::{BackendRegistry, BackendType, ManagedSecret};
use certsync::settings::BackendConfig;

fn folder(dir: &std::path::Path) -> BackendConfig {
    BackendConfig::new("Folder", BackendType::LocalFolder)
        .with_setting("path", dir.join("secrets").display().to_string())
}

#[tokio::test]
async fn test_operations_without_backend_degrade() {
    let dir = tempfile::tempdir().unwrap();
    let registry = BackendRegistry::open(common::settings_in(dir.path()))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    assert!(!registry.has_active_backend().await);
    assert!(!registry.store_secret("K", b"v", None, &cancel).await);
    assert_eq!(registry.get_secret("K", &cancel).await, None);
    assert!(!registry.delete_secret("K", &cancel).await);
    assert!(!registry.secret_exists("K", &cancel).await);
    assert!(!registry.test_connection(None, &cancel).await);
    assert!(matches!(
        registry.list_secrets(None, &cancel).await,
        Err(SyncError::NoBackend)
    ));
}

#[tokio::test]
async fn test_deleting_active_backend_clears_selection() {
    let dir = tempfile::tempdir().unwrap();
    let settings = common::settings_in(dir.path());
    let registry = BackendRegistry::open(settings.clone()).await.unwrap();
    let mut changes = registry.subscribe();
    let cancel = CancellationToken::new();

    let config = folder(dir.path());
    let id = config.id.clone();
    registry.save_config(config).await.unwrap();
    registry.set_active(Some(&id)).await.unwrap();
    assert_eq!(changes.recv().await.unwrap().active_id.as_deref(), Some(id.as_str()));

    let secret = ManagedSecret::new("api token");
    assert!(registry.store_secret(&secret.key, b"v", None, &cancel).await);
    assert!(registry.secret_exists(&secret.key, &cancel).await);
    assert!(registry.test_connection(None, &cancel).await);

    assert!(registry.delete_config(&id).await.unwrap());
    assert_eq!(changes.recv().await.unwrap().active_id, None);
    assert_eq!(registry.active_id().await, None);
    assert!(!registry.store_secret(&secret.key, b"v", None, &cancel).await);
    assert_eq!(settings.load().await.unwrap().active_backend_id, None);
    assert!(!registry.delete_config(&id).await.unwrap());
}

#[tokio::test]
async fn test_managed_secrets_are_listed_by_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let registry = BackendRegistry::open(common::settings_in(dir.path()))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let config = folder(dir.path());
    let id = config.id.clone();
    registry.save_config(config).await.unwrap();
    registry.set_active(Some(&id)).await.unwrap();

    for name in ["deploy key", "webhook"] {
        let secret = ManagedSecret::new(name);
        assert!(registry.store_secret(&secret.key, name.as_bytes(), None, &cancel).await);
    }
    assert!(registry.store_secret("CERT_AA_P12", b"x", None, &cancel).await);

    let listed = registry.list_secrets(Some("SECRET_"), &cancel).await.unwrap();
    assert_eq!(listed, vec!["SECRET_DEPLOY_KEY", "SECRET_WEBHOOK"]);
    assert_eq!(
        registry.get_secret("SECRET_WEBHOOK", &cancel).await.as_deref(),
        Some(&b"webhook"[..])
    );
}

#[tokio::test]
async fn test_set_active_none_keeps_configs() {
    let dir = tempfile::tempdir().unwrap();
    let registry = BackendRegistry::open(common::settings_in(dir.path()))
        .await
        .unwrap();

    let config = folder(dir.path());
    let id = config.id.clone();
    registry.save_config(config).await.unwrap();
    registry.set_active(Some(&id)).await.unwrap();
    registry.set_active(None).await.unwrap();

    assert_eq!(registry.active_id().await, None);
    assert_eq!(registry.configs().await.len(), 1);
    assert!(matches!(
        registry
            .attach_instance(&id, Box::new(common::SharedBackend(Default::default())))
            .await,
        Err(SyncError::Validation(_))
    ));
}

#[tokio::test]
async fn test_failed_save_leaves_keychain_as_it_was() {
    let dir = tempfile::tempdir().unwrap();
    let settings = common::settings_in(dir.path());
    let registry = BackendRegistry::open(settings.clone()).await.unwrap();

    let vault = |name: &str, token: &str| {
        BackendConfig::new(name, BackendType::HashicorpVault)
            .with_setting("address", "https://vault.local")
            .with_setting("token", token)
    };
    let existing = vault("Vault", "s.old");
    let existing_id = existing.id.clone();
    registry.save_config(existing.clone()).await.unwrap();

    // A non-empty directory where the settings file belongs makes every
    // further save fail.
    std::fs::remove_file(settings.path()).unwrap();
    std::fs::create_dir(settings.path()).unwrap();
    std::fs::write(settings.path().join("blocker"), b"x").unwrap();

    let mut changed = existing;
    changed.settings.insert("token".into(), "s.new".into());
    assert!(registry.save_config(changed).await.is_err());
    assert_eq!(
        settings.slot().get(&backend_slot(&existing_id)).unwrap().as_deref(),
        Some(r#"{"token":"s.old"}"#)
    );

    let fresh = vault("Other", "s.other");
    let fresh_id = fresh.id.clone();
    assert!(registry.save_config(fresh).await.is_err());
    assert_eq!(settings.slot().get(&backend_slot(&fresh_id)).unwrap(), None);
    assert_eq!(registry.configs().await.len(), 1);
}
