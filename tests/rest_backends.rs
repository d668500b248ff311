mod common;

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use certsync::certificates::{CertificateRef, CertificateSecretMetadata, CertificateSync};
use certsync::error::SyncError;
use certsync::secrets::providers::{DopplerBackend, VaultBackend};
use certsync::secrets::{BackendRegistry, BackendType, SecretBackend, SecretMetadata};
use certsync::settings::BackendConfig;

fn vault(server: &MockServer) -> VaultBackend {
    let config = BackendConfig::new("Vault", BackendType::HashicorpVault)
        .with_setting("address", server.uri())
        .with_setting("token", "s.root");
    VaultBackend::from_config(&config).unwrap()
}

fn doppler(server: &MockServer) -> DopplerBackend {
    let config = BackendConfig::new("Doppler", BackendType::Doppler)
        .with_setting("service_token", "dp.st.dev");
    DopplerBackend::from_config(&config)
        .unwrap()
        .with_base_url(server.uri())
}

#[tokio::test]
async fn test_vault_store_writes_value_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/secret/data/certsync/CERT_1_P12"))
        .and(header("X-Vault-Token", "s.root"))
        .and(body_json(json!({ "data": { "value": "aGk=" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/secret/metadata/certsync/CERT_1_P12"))
        .and(body_json(json!({ "custom_metadata": { "team_id": "AB12CD34EF" } })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut meta = SecretMetadata::new();
    meta.insert("team_id".into(), "AB12CD34EF".into());
    vault(&server)
        .store("CERT_1_P12", b"hi", Some(&meta))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_vault_upload_removes_value_when_metadata_write_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/secret/data/certsync/CERT_1A_P12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/secret/metadata/certsync/CERT_1A_P12"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "errors": ["boom"] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/secret/metadata/certsync/CERT_1A_P12"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(
        BackendRegistry::open(common::settings_in(dir.path()))
            .await
            .unwrap(),
    );
    let config = BackendConfig::new("Vault", BackendType::HashicorpVault)
        .with_setting("address", server.uri())
        .with_setting("token", "s.root");
    let id = config.id.clone();
    registry.save_config(config).await.unwrap();
    registry.set_active(Some(&id)).await.unwrap();
    let sync = CertificateSync::new(registry, Arc::new(common::FakeCredentials::default()));

    let meta = CertificateSecretMetadata {
        serial_number: "1A".into(),
        common_name: "Apple Development: Jane".into(),
        team_id: None,
        expires_at: None,
        uploaded_at: chrono::Utc::now(),
        uploaded_by: "ci".into(),
    };
    let result = sync
        .upload_to_cloud(
            &CertificateRef::new("1A", "1A", "cert 1A"),
            b"p12",
            "pw",
            Some(&meta),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(SyncError::Provider { .. })));
    let deletes = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "DELETE")
        .count();
    assert_eq!(deletes, 1);
}

#[tokio::test]
async fn test_vault_get_and_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/certsync/CERT_1_P12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "data": { "value": "aGk=" }, "metadata": { "version": 3 } }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/certsync/CERT_2_P12"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/secret/metadata/certsync/CERT_2_P12"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let backend = vault(&server);
    assert_eq!(backend.get("CERT_1_P12").await.unwrap(), Some(b"hi".to_vec()));
    assert_eq!(backend.get("CERT_2_P12").await.unwrap(), None);
    backend.delete("CERT_2_P12").await.unwrap();
}

#[tokio::test]
async fn test_vault_list_skips_folders_and_filters() {
    let server = MockServer::start().await;
    Mock::given(method("LIST"))
        .and(path("/v1/secret/metadata/certsync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "keys": ["CERT_1_P12", "CERT_1_PASSWORD", "nested/", "SECRET_X"] }
        })))
        .mount(&server)
        .await;

    let keys = vault(&server).list(Some("cert_")).await.unwrap();
    assert_eq!(keys, vec!["CERT_1_P12", "CERT_1_PASSWORD"]);
}

#[tokio::test]
async fn test_vault_approle_login_happens_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .and(body_json(json!({ "role_id": "role", "secret_id": "sid" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": { "client_token": "s.approle" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/certsync/K"))
        .and(header("X-Vault-Token", "s.approle"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let config = BackendConfig::new("Vault", BackendType::HashicorpVault)
        .with_setting("address", server.uri())
        .with_setting("role_id", "role")
        .with_setting("secret_id", "sid");
    let backend = VaultBackend::from_config(&config).unwrap();
    assert_eq!(backend.get("K").await.unwrap(), None);
    assert_eq!(backend.get("K").await.unwrap(), None);
}

#[tokio::test]
async fn test_vault_forbidden_connection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/token/lookup-self"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = vault(&server).test_connection().await.unwrap_err();
    assert!(matches!(err, SyncError::Provider { .. }));
    assert!(err.to_string().contains("permission denied"));
}

#[tokio::test]
async fn test_doppler_round_trip_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/configs/config/secrets"))
        .and(header("Authorization", "Bearer dp.st.dev"))
        .and(body_partial_json(json!({ "secrets": { "CERT_1_P12": "aGk=" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "secrets": {} })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/configs/config/secret"))
        .and(query_param("name", "CERT_1_P12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "CERT_1_P12",
            "value": { "raw": "aGk=", "computed": "aGk=" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/configs/config/secret"))
        .and(query_param("name", "MISSING"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let backend = doppler(&server);
    backend.store("CERT_1_P12", b"hi", None).await.unwrap();
    assert_eq!(backend.get("CERT_1_P12").await.unwrap(), Some(b"hi".to_vec()));
    assert_eq!(backend.get("missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_doppler_list_hides_builtin_names() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/configs/config/secrets/names"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "names": ["DOPPLER_CONFIG", "DOPPLER_PROJECT", "CERT_1_P12", "SECRET_X"]
        })))
        .mount(&server)
        .await;

    let backend = doppler(&server);
    assert_eq!(backend.list(None).await.unwrap(), vec!["CERT_1_P12", "SECRET_X"]);
    assert_eq!(backend.list(Some("CERT_")).await.unwrap(), vec!["CERT_1_P12"]);
}

#[tokio::test]
async fn test_doppler_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = doppler(&server).test_connection().await.unwrap_err();
    assert!(err.to_string().contains("invalid service token"));
}
