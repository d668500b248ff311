mod common;

use std::sync::Arc;

use certsync::backup;
use certsync::error::SyncError;
use certsync::keychain::{MemorySlot, SecretSlot, backend_slot, identity_slot};
use certsync::secrets::{BackendRegistry, BackendType};
use certsync::settings::{BackendConfig, Identity, IdentityKind, SettingsDocument, SettingsStore};

#[tokio::test]
async fn test_settings_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let slot: Arc<dyn SecretSlot> = Arc::new(MemorySlot::new());

    let mut doc = SettingsDocument::default();
    doc.preferences.auto_sync_certificates = true;
    doc.backend_configs.push(
        BackendConfig::new("Folder", BackendType::LocalFolder).with_setting("path", "/tmp/x"),
    );
    let saved = SettingsStore::in_dir(dir.path(), slot.clone())
        .save(doc)
        .await
        .unwrap();

    let reopened = SettingsStore::in_dir(dir.path(), slot);
    assert_eq!(reopened.load().await.unwrap(), saved);
}

#[tokio::test]
async fn test_foreign_key_cannot_read_settings() {
    let dir = tempfile::tempdir().unwrap();
    SettingsStore::in_dir(dir.path(), Arc::new(MemorySlot::new()))
        .save(SettingsDocument::default())
        .await
        .unwrap();

    let stranger = SettingsStore::in_dir(dir.path(), Arc::new(MemorySlot::new()));
    assert!(matches!(
        stranger.load().await,
        Err(SyncError::Authentication)
    ));
}

#[tokio::test]
async fn test_backup_moves_secrets_between_machines() {
    let source_dir = tempfile::tempdir().unwrap();
    let source = common::settings_in(source_dir.path());
    let registry = BackendRegistry::open(source.clone()).await.unwrap();

    let config = BackendConfig::new("Vault", BackendType::HashicorpVault)
        .with_setting("address", "https://vault.example")
        .with_setting("token", "s.secret");
    let backend_id = config.id.clone();
    registry.save_config(config).await.unwrap();
    registry.set_active(Some(&backend_id)).await.unwrap();

    let mut identity = Identity::new("ASC", IdentityKind::AppStoreConnect);
    identity.private_key = Some("PRIVATE".into());
    let identity_id = identity.id.clone();
    source.upsert_identity(identity).await.unwrap();

    let blob = backup::export(&source, "correct horse").await.unwrap();
    assert!(backup::validate_backup(&blob));
    assert!(!String::from_utf8_lossy(&blob).contains("s.secret"));

    let target_dir = tempfile::tempdir().unwrap();
    let target = common::settings_in(target_dir.path());
    let doc = backup::import(&blob, "correct horse").unwrap();
    assert_eq!(doc.backend(&backend_id).unwrap().setting("token"), Some("s.secret"));

    let restored = backup::restore(doc, &target).await.unwrap();
    assert_eq!(restored.active_backend_id.as_deref(), Some(backend_id.as_str()));
    assert_eq!(restored.backend(&backend_id).unwrap().setting("token"), None);
    assert_eq!(restored.identity(&identity_id).unwrap().private_key, None);

    let slot = target.slot();
    assert_eq!(
        slot.get(&identity_slot(&identity_id)).unwrap().as_deref(),
        Some("PRIVATE")
    );
    assert!(slot.get(&backend_slot(&backend_id)).unwrap().unwrap().contains("s.secret"));

    let reopened = BackendRegistry::open(target.clone()).await.unwrap();
    let hydrated = reopened.config(&backend_id).await.unwrap().unwrap();
    assert_eq!(hydrated.setting("token"), Some("s.secret"));
}

#[tokio::test]
async fn test_backup_password_and_format_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = common::settings_in(dir.path());
    let blob = backup::export(&store, "pw").await.unwrap();

    assert!(matches!(
        backup::import(&blob, "other"),
        Err(SyncError::Authentication)
    ));

    let settings_file = std::fs::read(store.path()).unwrap_or_default();
    assert!(!backup::validate_backup(&settings_file));
    assert!(matches!(
        backup::import(b"PK\x03\x04 not a backup at all", "pw"),
        Err(SyncError::InvalidBackup)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transforms_lose_no_update() {
    let dir = tempfile::tempdir().unwrap();
    let slot: Arc<dyn SecretSlot> = Arc::new(MemorySlot::new());
    let store = Arc::new(SettingsStore::in_dir(dir.path(), slot.clone()));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .transform(move |doc| {
                        doc.identities
                            .push(Identity::new(format!("key {}", i), IdentityKind::AppStoreConnect));
                        Ok(())
                    })
                    .await
            })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        task.unwrap().unwrap();
    }

    let reopened = SettingsStore::in_dir(dir.path(), slot);
    let mut names: Vec<_> = reopened
        .load()
        .await
        .unwrap()
        .identities
        .into_iter()
        .map(|i| i.name)
        .collect();
    names.sort();
    let mut expected: Vec<_> = (0..16).map(|i| format!("key {}", i)).collect();
    expected.sort();
    assert_eq!(names, expected);
}
