//! Parsing utilities for command-line input.

use std::collections::BTreeMap;

use crate::error::{Result, SyncError};

/// Parse a `key=value` backend setting.
///
/// # Examples
/// ```
/// use certsync::utils::parse_setting;
///
/// let (key, value) = parse_setting("region=eu-west-1").unwrap();
/// assert_eq!(key, "region");
/// assert_eq!(value, "eu-west-1");
/// ```
pub fn parse_setting(input: &str) -> Result<(String, String)> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(SyncError::validation(format!(
            "Invalid setting '{}'. Use format: KEY=VALUE (e.g., region=us-east-1)",
            input
        ))),
    }
}

/// Parse several `key=value` settings; later keys win.
pub fn parse_settings<I, S>(inputs: I) -> Result<BTreeMap<String, String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut settings = BTreeMap::new();
    for input in inputs {
        let (key, value) = parse_setting(input.as_ref())?;
        settings.insert(key, value);
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setting() {
        assert_eq!(
            parse_setting("address=https://vault:8200").unwrap(),
            ("address".to_string(), "https://vault:8200".to_string())
        );
        assert_eq!(
            parse_setting("token=a=b").unwrap(),
            ("token".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_setting("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_setting("novalue").is_err());
        assert!(parse_setting("=value").is_err());
    }

    #[test]
    fn test_parse_settings_last_wins() {
        let settings = parse_settings(["a=1", "b=2", "a=3"]).unwrap();
        assert_eq!(settings.get("a").map(String::as_str), Some("3"));
        assert_eq!(settings.len(), 2);
    }
}
