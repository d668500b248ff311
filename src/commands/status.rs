//! Status command - where each certificate's key material lives.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_humanize::HumanTime;
use tokio_util::sync::CancellationToken;

use super::App;
use crate::certificates::{CertificateRef, SecretLocation};
use crate::error::Result;

pub async fn handle_status(app: &App, all: bool, cancel: &CancellationToken) -> Result<()> {
    match app.registry.active_id().await {
        Some(id) => {
            let name = app
                .registry
                .configs()
                .await
                .into_iter()
                .find(|c| c.id == id)
                .map(|c| format!("{} [{}]", c.name, c.backend_type))
                .unwrap_or(id);
            println!("Backend: {}", name);
        }
        None => {
            println!("Backend: (none)");
            println!("  Run 'certsync backend add' and 'certsync backend activate' to set one up.");
        }
    }
    println!();

    let identities = app.sync.credentials().list_signing_identities().await?;
    let expiry: HashMap<String, DateTime<Utc>> = identities
        .iter()
        .filter_map(|i| Some((i.sanitized_serial()?, i.expires_at?)))
        .collect();

    let statuses = if all {
        app.sync.reconcile(cancel).await?
    } else {
        let refs: Vec<CertificateRef> = identities
            .iter()
            .filter(|i| i.is_valid)
            .filter_map(CertificateRef::from_identity)
            .collect();
        app.sync.get_statuses(&refs, cancel).await?
    };

    if statuses.is_empty() {
        println!("No signing certificates found.");
        return Ok(());
    }

    for info in &statuses {
        let when = expiry
            .get(&info.serial_number)
            .map(|at| describe_expiry(*at, Utc::now()))
            .unwrap_or_default();
        println!(
            "{:<10} {:<24} {} {}",
            location_label(info.location),
            info.serial_number,
            info.display_name,
            when
        );
    }
    Ok(())
}

fn location_label(location: SecretLocation) -> &'static str {
    match location {
        SecretLocation::Both => "synced",
        SecretLocation::LocalOnly => "local",
        SecretLocation::CloudOnly => "cloud",
        SecretLocation::None => "missing",
    }
}

fn describe_expiry(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let relative = HumanTime::from(at - now);
    if at <= now {
        format!("(expired {})", relative)
    } else {
        format!("(expires {})", relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_expiry() {
        let now = Utc::now();
        assert!(describe_expiry(now - chrono::Duration::days(3), now).starts_with("(expired"));
        assert!(describe_expiry(now + chrono::Duration::days(90), now).starts_with("(expires"));
    }
}
