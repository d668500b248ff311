//! Managed secrets - auxiliary values routed through the active backend.

use std::io::Write;

use tokio_util::sync::CancellationToken;

use super::App;
use crate::cli::SecretCommands;
use crate::error::{Result, SyncError};
use crate::secrets::ManagedSecret;
use crate::secrets::naming::MANAGED_PREFIX;

pub async fn handle_secret(app: &App, command: SecretCommands, cancel: &CancellationToken) -> Result<()> {
    if !app.registry.has_active_backend().await {
        return Err(SyncError::NoBackend);
    }

    match command {
        SecretCommands::Put { name, file } => {
            let secret = ManagedSecret::new(name);
            let value = zeroize::Zeroizing::new(tokio::fs::read(&file).await?);
            if !app.registry.store_secret(&secret.key, &value, None, cancel).await {
                return Err(SyncError::Other(format!("failed to store {}", secret.key)));
            }
            println!("Stored {}", secret.key);
        }
        SecretCommands::Get { name } => {
            let secret = ManagedSecret::new(name);
            let value = app
                .registry
                .get_secret(&secret.key, cancel)
                .await
                .map(zeroize::Zeroizing::new)
                .ok_or_else(|| SyncError::not_found(format!("no secret {}", secret.key)))?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&value)?;
            stdout.flush()?;
        }
        SecretCommands::Rm { name } => {
            let secret = ManagedSecret::new(name);
            if !app.registry.delete_secret(&secret.key, cancel).await {
                return Err(SyncError::Other(format!("failed to delete {}", secret.key)));
            }
            println!("Deleted {}", secret.key);
        }
        SecretCommands::Ls => {
            let keys = app.registry.list_secrets(Some(MANAGED_PREFIX), cancel).await?;
            for name in keys.iter().filter_map(|k| ManagedSecret::name_from_key(k)) {
                println!("{}", name);
            }
        }
    }
    Ok(())
}
