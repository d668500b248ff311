//! Backup commands - export, import and check settings backups.

use crate::backup;
use crate::cli::BackupCommands;
use crate::error::{Result, SyncError};
use crate::settings::SettingsStore;
use crate::utils::prompt::{confirm, prompt_password, prompt_password_with_confirm};
use crate::utils::restrict_file_permissions;

pub async fn handle_backup(settings: &SettingsStore, command: BackupCommands) -> Result<()> {
    match command {
        BackupCommands::Export { file } => {
            let password = prompt_password_with_confirm("Backup password")?;
            let blob = backup::export(settings, &password).await?;
            tokio::fs::write(&file, &blob).await?;
            restrict_file_permissions(&file)?;
            println!("Backup written to {}", file.display());
        }
        BackupCommands::Import { file, force } => {
            let blob = tokio::fs::read(&file).await?;
            if !backup::validate_backup(&blob) {
                return Err(SyncError::InvalidBackup);
            }
            let password = prompt_password("Backup password")?;
            let doc = backup::import(&blob, &password)?;

            if settings.exists().await
                && !force
                && !confirm("Replace the current settings with this backup?")?
            {
                println!("Import cancelled.");
                return Ok(());
            }
            let restored = backup::restore(doc, settings).await?;
            println!(
                "Restored {} backend(s) and {} identit(ies)",
                restored.backend_configs.len(),
                restored.identities.len()
            );
        }
        BackupCommands::Check { file } => {
            let blob = tokio::fs::read(&file).await?;
            if backup::validate_backup(&blob) {
                println!("{} is a certsync backup", file.display());
            } else {
                return Err(SyncError::InvalidBackup);
            }
        }
    }
    Ok(())
}
