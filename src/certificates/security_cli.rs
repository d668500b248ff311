//! [`CredentialStore`] over the macOS `security` command.
//!
//! Identities come from `security find-identity -p codesigning`. Serial
//! numbers and expiry are not part of that output, so they are resolved from
//! `security find-certificate -a -Z -p` (PEM blocks tagged with their SHA-1
//! hash) and cached per hash for the lifetime of the store.
//!
//! `security import` takes the PKCS#12 passphrase only as `-P <passphrase>`
//! (or through an interactive SecurityAgent dialog), so during an import the
//! passphrase is visible in the process list for as long as the `security`
//! process runs. Identities uploaded by certsync itself carry a random
//! per-upload passphrase; a passphrase typed for a `.p12` file is exposed
//! the same way on download.

use std::collections::HashMap;
use std::io::Write;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::identity::{CredentialStore, LocalSigningIdentity};
use crate::error::{Result, SyncError};

const PROGRAM: &str = "security";

/// Serial, expiry and subject CN read from one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDetails {
    pub serial_number: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub common_name: Option<String>,
}

pub struct SecurityCli {
    keychain: String,
    details: Mutex<HashMap<String, CertificateDetails>>,
}

impl SecurityCli {
    /// `keychain` is a keychain name or path, e.g. `login.keychain-db`.
    pub fn new(keychain: impl Into<String>) -> Self {
        Self {
            keychain: keychain.into(),
            details: Mutex::new(HashMap::new()),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(PROGRAM)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SyncError::command(PROGRAM, format!("failed to start: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::command(PROGRAM, stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Fill the serial cache if any of `hashes` is not in it yet. One
    /// `find-certificate` call covers every certificate in the keychain.
    async fn resolve_details(&self, hashes: &[String]) -> Result<()> {
        let mut cache = self.details.lock().await;
        if hashes.iter().all(|h| cache.contains_key(h)) {
            return Ok(());
        }
        let output = self
            .run(&["find-certificate", "-a", "-Z", "-p", &self.keychain])
            .await?;
        let parsed = parse_certificates(&output);
        debug!(count = parsed.len(), "resolved certificate serials");
        cache.extend(parsed);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SecurityCli {
    async fn list_signing_identities(&self) -> Result<Vec<LocalSigningIdentity>> {
        let output = self
            .run(&["find-identity", "-p", "codesigning", &self.keychain])
            .await?;
        let mut identities = parse_find_identity(&output);

        let hashes: Vec<String> = identities.iter().filter_map(|i| i.hash.clone()).collect();
        if let Err(e) = self.resolve_details(&hashes).await {
            // Identities are still usable for display without serials.
            warn!(error = %e, "could not resolve certificate serial numbers");
        }

        let cache = self.details.lock().await;
        for identity in &mut identities {
            let Some(details) = identity.hash.as_ref().and_then(|h| cache.get(h)) else {
                continue;
            };
            identity.serial_number = Some(details.serial_number.clone());
            identity.expires_at = details.expires_at;
            if let Some(cn) = &details.common_name {
                identity.common_name = cn.clone();
            }
        }
        Ok(identities)
    }

    async fn export_portable(
        &self,
        identity: &LocalSigningIdentity,
        _password: &str,
    ) -> Result<Vec<u8>> {
        // `security export` can only dump every identity in a keychain.
        Err(SyncError::unsupported(format!(
            "cannot export '{}' on its own with the security tool; export it from \
             Keychain Access and pass the .p12 file",
            identity.identity
        )))
    }

    async fn import_portable(&self, bytes: &[u8], password: &str) -> Result<bool> {
        // NamedTempFile is created 0600 and removed on drop, on every path.
        let mut file = tempfile::Builder::new()
            .prefix("certsync-")
            .suffix(".p12")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;

        let path = file.path().to_string_lossy().into_owned();
        let result = self
            .run(&[
                "import",
                &path,
                "-k",
                &self.keychain,
                "-f",
                "pkcs12",
                "-P",
                password,
                "-T",
                "/usr/bin/codesign",
            ])
            .await;
        drop(file);

        match result {
            Ok(_) => {
                debug!(keychain = %self.keychain, "imported PKCS#12");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "keychain import failed");
                Ok(false)
            }
        }
    }

    async fn delete_identity(&self, identity: &LocalSigningIdentity) -> Result<()> {
        let hash = identity.hash.as_deref().ok_or_else(|| {
            SyncError::validation(format!("identity '{}' has no hash", identity.identity))
        })?;
        self.run(&["delete-identity", "-Z", hash, &self.keychain])
            .await?;
        self.details.lock().await.remove(hash);
        Ok(())
    }
}

/// Parse `security find-identity` output. Identities listed in both the
/// "matching" and "valid only" sections appear once; a `CSSMERR_*` suffix
/// marks an identity invalid.
pub fn parse_find_identity(output: &str) -> Vec<LocalSigningIdentity> {
    let Ok(line_re) =
        Regex::new(r#"^\s*\d+\)\s+([0-9A-Fa-f]{40})\s+"(.+)"(?:\s+\((CSSMERR_[A-Z_]+)\))?\s*$"#)
    else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut identities = Vec::new();
    for line in output.lines() {
        let Some(caps) = line_re.captures(line) else {
            continue;
        };
        let hash = caps[1].to_ascii_uppercase();
        if !seen.insert(hash.clone()) {
            continue;
        }
        let mut identity = LocalSigningIdentity::from_identity_string(&caps[2]);
        identity.hash = Some(hash);
        identity.is_valid = caps.get(3).is_none();
        identities.push(identity);
    }
    identities
}

/// Parse `security find-certificate -a -Z -p` output into details keyed by
/// uppercase SHA-1 hash. Blocks that fail to parse are skipped.
pub fn parse_certificates(output: &str) -> HashMap<String, CertificateDetails> {
    let mut details = HashMap::new();
    let mut current_hash: Option<String> = None;
    let mut pem: Option<String> = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(hash) = line.strip_prefix("SHA-1 hash:") {
            current_hash = Some(hash.trim().to_ascii_uppercase());
        } else if line == "-----BEGIN CERTIFICATE-----" {
            pem = Some(format!("{}\n", line));
        } else if let Some(block) = pem.as_mut() {
            block.push_str(line);
            block.push('\n');
            if line == "-----END CERTIFICATE-----" {
                let block = pem.take().unwrap_or_default();
                if let (Some(hash), Some(parsed)) = (current_hash.take(), parse_pem(&block)) {
                    details.insert(hash, parsed);
                }
            }
        }
    }
    details
}

fn parse_pem(block: &str) -> Option<CertificateDetails> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(block.as_bytes()).ok()?;
    let cert = pem.parse_x509().ok()?;
    let expires_at = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0);
    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    Some(CertificateDetails {
        serial_number: cert.raw_serial_as_string(),
        expires_at,
        common_name,
    })
}
