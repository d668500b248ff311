//! 1Password through the `op` command-line tool.
//!
//! Every secret is a concealed custom field of a single item (default title
//! `certsync`) in the configured vault. Field values are base64. The item is
//! created lazily on the first store; a missing item means "no secrets yet".
//! Item JSON is always exchanged over stdin/stdout so values never show up in
//! process arguments. Writes rewrite the whole item, so they are serialized
//! per backend instance.

use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::secrets::factory::BackendType;
use crate::secrets::manager::{SecretBackend, SecretMetadata};
use crate::secrets::naming::{filter_prefix, restrict};
use crate::settings::BackendConfig;

const PROGRAM: &str = "op";

pub struct OnePasswordBackend {
    program: String,
    vault: String,
    item_title: String,
    account: Option<String>,
    service_account_token: Option<String>,
    /// Held from loading the item until it is saved.
    write_lock: Mutex<()>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    title: String,
    category: String,
    #[serde(default)]
    fields: Vec<ItemField>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ItemField {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl ItemField {
    /// Username/password/notes and friends are not ours to list.
    fn is_builtin(&self) -> bool {
        self.purpose.is_some() || self.id == "notesPlain"
    }

    fn concealed(label: &str, value: String) -> Self {
        Self {
            id: label.to_string(),
            field_type: "CONCEALED".to_string(),
            purpose: None,
            label: Some(label.to_string()),
            value: Some(value),
            rest: Map::new(),
        }
    }
}

impl Item {
    fn custom_field(&self, label: &str) -> Option<&ItemField> {
        self.fields
            .iter()
            .find(|f| !f.is_builtin() && f.label.as_deref() == Some(label))
    }
}

fn is_missing_item(stderr: &str) -> bool {
    stderr.contains("isn't an item") || stderr.contains("not found")
}

impl OnePasswordBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let vault = config.setting("vault").ok_or_else(|| SyncError::MissingSetting {
            backend: config.name.clone(),
            key: "vault".into(),
        })?;
        Ok(Self {
            program: PROGRAM.to_string(),
            vault: vault.to_string(),
            item_title: config
                .setting("item_title")
                .unwrap_or("certsync")
                .to_string(),
            account: config.setting("account").map(str::to_string),
            service_account_token: config.setting("service_account_token").map(str::to_string),
            write_lock: Mutex::new(()),
        })
    }

    /// Run a different `op` binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .arg("--vault")
            .arg(&self.vault)
            .arg("--format")
            .arg("json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(account) = &self.account {
            cmd.arg("--account").arg(account);
        }
        if let Some(token) = &self.service_account_token {
            cmd.env("OP_SERVICE_ACCOUNT_TOKEN", token);
        }
        cmd
    }

    /// Run `op` with optional stdin. Returns `(success, stdout, stderr)`.
    async fn run(&self, args: &[&str], input: Option<&[u8]>) -> Result<(bool, Vec<u8>, String)> {
        let mut child = self.command(args).spawn().map_err(|e| {
            SyncError::command(PROGRAM, format!("failed to start (is 1Password CLI installed?): {}", e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(bytes) = input {
                stdin.write_all(bytes).await?;
            }
            // Dropping closes the pipe so `op` stops waiting for input.
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((output.status.success(), output.stdout, stderr))
    }

    /// The certsync item, or `None` if it has not been created yet.
    async fn load_item(&self) -> Result<Option<Item>> {
        let (ok, stdout, stderr) = self
            .run(&["item", "get", &self.item_title], None)
            .await?;
        if !ok {
            if is_missing_item(&stderr) {
                return Ok(None);
            }
            return Err(SyncError::command(PROGRAM, stderr));
        }
        Ok(Some(serde_json::from_slice(&stdout)?))
    }

    async fn create_item(&self, item: &Item) -> Result<()> {
        let json = serde_json::to_vec(item)?;
        let (ok, _, stderr) = self.run(&["item", "create", "-"], Some(&json)).await?;
        if !ok {
            return Err(SyncError::command(PROGRAM, stderr));
        }
        debug!(vault = %self.vault, item = %self.item_title, "created 1Password item");
        Ok(())
    }

    async fn save_item(&self, item: &Item) -> Result<()> {
        let id = item.id.as_deref().unwrap_or(&self.item_title);
        let json = serde_json::to_vec(item)?;
        let (ok, _, stderr) = self.run(&["item", "edit", id], Some(&json)).await?;
        if !ok {
            return Err(SyncError::command(PROGRAM, stderr));
        }
        Ok(())
    }

    fn new_item(&self) -> Item {
        Item {
            id: None,
            title: self.item_title.clone(),
            category: "SECURE_NOTE".to_string(),
            fields: vec![ItemField {
                id: "notesPlain".to_string(),
                field_type: "STRING".to_string(),
                purpose: Some("NOTES".to_string()),
                label: Some("notesPlain".to_string()),
                value: Some("Managed by certsync".to_string()),
                rest: Map::new(),
            }],
            rest: Map::new(),
        }
    }
}

#[async_trait]
impl SecretBackend for OnePasswordBackend {
    fn kind(&self) -> BackendType {
        BackendType::OnepasswordCli
    }

    fn native_key(&self, key: &str) -> String {
        restrict(key, |c| c.is_ascii_alphanumeric() || c == '_', 128)
    }

    async fn test_connection(&self) -> Result<()> {
        let (ok, _, stderr) = self.run(&["vault", "get", &self.vault], None).await?;
        if ok {
            Ok(())
        } else {
            Err(SyncError::command(PROGRAM, stderr))
        }
    }

    async fn store(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&SecretMetadata>,
    ) -> Result<()> {
        if metadata.is_some() {
            debug!(key, "1Password fields carry no metadata, skipping");
        }
        let label = self.native_key(key);
        let encoded = BASE64.encode(value);

        let _guard = self.write_lock.lock().await;
        match self.load_item().await? {
            None => {
                let mut item = self.new_item();
                item.fields.push(ItemField::concealed(&label, encoded));
                self.create_item(&item).await
            }
            Some(mut item) => {
                match item
                    .fields
                    .iter_mut()
                    .find(|f| !f.is_builtin() && f.label.as_deref() == Some(label.as_str()))
                {
                    Some(field) => field.value = Some(encoded),
                    None => item.fields.push(ItemField::concealed(&label, encoded)),
                }
                self.save_item(&item).await
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(item) = self.load_item().await? else {
            return Ok(None);
        };
        let Some(value) = item
            .custom_field(&self.native_key(key))
            .and_then(|f| f.value.as_deref())
        else {
            return Ok(None);
        };
        BASE64
            .decode(value.trim())
            .map(Some)
            .map_err(|e| SyncError::provider("onepassword", format!("field is not base64: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(mut item) = self.load_item().await? else {
            return Ok(());
        };
        let label = self.native_key(key);
        let before = item.fields.len();
        item.fields
            .retain(|f| f.is_builtin() || f.label.as_deref() != Some(label.as_str()));
        if item.fields.len() == before {
            return Ok(());
        }
        self.save_item(&item).await
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let Some(item) = self.load_item().await? else {
            return Ok(Vec::new());
        };
        let labels = item
            .fields
            .into_iter()
            .filter(|f| !f.is_builtin())
            .filter_map(|f| f.label)
            .collect();
        Ok(filter_prefix(labels, prefix))
    }
}
