use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys::sanitize_serial;
use crate::error::Result;

/// A code-signing identity found in the local credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSigningIdentity {
    /// Full identity string, e.g. `Apple Distribution: Acme Inc (AB12CD34EF)`.
    pub identity: String,
    pub common_name: String,
    pub team_id: Option<String>,
    pub serial_number: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_valid: bool,
    /// Store-internal SHA-1 hash, used to resolve the serial once.
    pub hash: Option<String>,
}

impl LocalSigningIdentity {
    /// Build from an identity string, pulling the team id out of a trailing
    /// `(XXXXXXXXXX)`.
    pub fn from_identity_string(identity: impl Into<String>) -> Self {
        let identity = identity.into();
        let team_id = parse_team_id(&identity);
        Self {
            common_name: identity.clone(),
            identity,
            team_id,
            serial_number: None,
            expires_at: None,
            is_valid: true,
            hash: None,
        }
    }

    pub fn sanitized_serial(&self) -> Option<String> {
        self.serial_number
            .as_deref()
            .map(sanitize_serial)
            .filter(|s| !s.is_empty())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// Team id from the last parenthesized group, when it looks like one
/// (10 uppercase alphanumerics).
pub fn parse_team_id(identity: &str) -> Option<String> {
    let open = identity.rfind('(')?;
    let close = open + identity[open..].find(')')?;
    let candidate = &identity[open + 1..close];
    let looks_like_team = candidate.len() == 10
        && candidate
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    looks_like_team.then(|| candidate.to_string())
}

/// The OS credential store as seen by the sync engine.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn list_signing_identities(&self) -> Result<Vec<LocalSigningIdentity>>;

    /// Whether a valid identity with this serial exists locally.
    async fn has_private_key(&self, serial: &str) -> Result<bool> {
        let wanted = sanitize_serial(serial);
        Ok(self
            .list_signing_identities()
            .await?
            .iter()
            .any(|i| i.is_valid && i.sanitized_serial().as_deref() == Some(wanted.as_str())))
    }

    /// Export one identity (certificate and private key) as PKCS#12 bytes.
    async fn export_portable(&self, identity: &LocalSigningIdentity, password: &str)
    -> Result<Vec<u8>>;

    /// Import PKCS#12 bytes. `Ok(false)` when the store rejected the file.
    async fn import_portable(&self, bytes: &[u8], password: &str) -> Result<bool>;

    async fn delete_identity(&self, identity: &LocalSigningIdentity) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_team_id() {
        assert_eq!(
            parse_team_id("Apple Distribution: Acme Inc (AB12CD34EF)").as_deref(),
            Some("AB12CD34EF")
        );
        assert_eq!(
            parse_team_id("Apple Development: jane@acme.com (Q9XY8ZW7V6)").as_deref(),
            Some("Q9XY8ZW7V6")
        );
        assert_eq!(parse_team_id("Developer ID Application: Acme (lower12345)"), None);
        assert_eq!(parse_team_id("No team here"), None);
    }

    #[test]
    fn test_expiry() {
        let mut identity = LocalSigningIdentity::from_identity_string("Apple Development: X");
        let now = Utc::now();
        assert!(!identity.is_expired(now));
        identity.expires_at = Some(now - chrono::Duration::days(1));
        assert!(identity.is_expired(now));
    }

    #[test]
    fn test_sanitized_serial() {
        let mut identity = LocalSigningIdentity::from_identity_string("Apple Development: X");
        assert_eq!(identity.sanitized_serial(), None);
        identity.serial_number = Some("00:7a:FF".into());
        assert_eq!(identity.sanitized_serial().as_deref(), Some("7AFF"));
    }
}
