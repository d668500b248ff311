//! Upload, download and delete of single certificates.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use super::App;
use crate::certificates::{CertificateRef, CertificateSecretMetadata, sanitize_serial};
use crate::error::{Result, SyncError};
use crate::utils::prompt::prompt_password;

/// Upload a certificate by serial, either from a PKCS#12 file or by
/// exporting the matching local identity.
pub async fn handle_upload(
    app: &App,
    serial: &str,
    p12: Option<PathBuf>,
    cancel: &CancellationToken,
) -> Result<()> {
    let serial = sanitize_serial(serial);
    if serial.is_empty() {
        return Err(SyncError::validation("serial number is empty"));
    }

    match p12 {
        None => app.sync.upload_local_identity(&serial, cancel).await?,
        Some(path) => {
            let bytes = zeroize::Zeroizing::new(tokio::fs::read(&path).await?);
            let password = prompt_password(&format!("Password for {}", path.display()))?;

            // Annotate with the local identity when there is one.
            let local = app
                .sync
                .credentials()
                .list_signing_identities()
                .await?
                .into_iter()
                .find(|i| i.sanitized_serial().as_deref() == Some(serial.as_str()));
            let metadata = local.as_ref().map(CertificateSecretMetadata::for_identity);
            let certificate = CertificateRef::new(
                serial.clone(),
                serial.clone(),
                local
                    .as_ref()
                    .map(|i| i.identity.clone())
                    .unwrap_or_else(|| path.display().to_string()),
            );

            app.sync
                .upload_to_cloud(&certificate, &bytes, &password, metadata.as_ref(), cancel)
                .await?;
        }
    }

    println!("Uploaded certificate {}", serial);
    Ok(())
}

pub async fn handle_download(app: &App, serial: &str, cancel: &CancellationToken) -> Result<()> {
    app.sync.download_and_install_by_serial(serial, cancel).await?;
    println!("Installed certificate {}", sanitize_serial(serial));
    Ok(())
}

pub async fn handle_delete(
    app: &App,
    serial: &str,
    local: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let serial = sanitize_serial(serial);
    app.sync.delete_from_cloud(&serial, cancel).await?;
    println!("Deleted certificate {} from the backend", serial);

    if local {
        let removed = app.sync.remove_local(&serial).await?;
        if removed == 0 {
            println!("No local identity with serial {}", serial);
        } else {
            println!("Removed {} local identit{}", removed, if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
