//! Serial normalization and the backend keys derived from it.
//!
//! The keychain and remote APIs format the same serial differently (hex
//! case, separators, leading zeros), so both sides are normalized before
//! they are compared or turned into keys.

/// Prefix shared by every certificate key.
pub const CERT_PREFIX: &str = "CERT_";
pub const VALUE_SUFFIX: &str = "_P12";
pub const PASSWORD_SUFFIX: &str = "_PASSWORD";
pub const META_SUFFIX: &str = "_META";

/// Strip non-alphanumerics, uppercase, and trim leading zeros.
///
/// A non-empty serial made only of zeros normalizes to `"0"`.
pub fn sanitize_serial(serial: &str) -> String {
    let cleaned: String = serial
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let trimmed = cleaned.trim_start_matches('0');
    if trimmed.is_empty() && !cleaned.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The three backend keys for one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateKeys {
    pub serial: String,
    pub value: String,
    pub password: String,
    pub metadata: String,
}

impl CertificateKeys {
    pub fn for_serial(serial: &str) -> Self {
        let serial = sanitize_serial(serial);
        Self {
            value: format!("{CERT_PREFIX}{serial}{VALUE_SUFFIX}"),
            password: format!("{CERT_PREFIX}{serial}{PASSWORD_SUFFIX}"),
            metadata: format!("{CERT_PREFIX}{serial}{META_SUFFIX}"),
            serial,
        }
    }

    /// Recover the sanitized serial from a listed value key. Other keys
    /// (passwords, metadata, unrelated secrets) yield `None`.
    pub fn serial_from_value_key(key: &str) -> Option<String> {
        let upper = key.to_ascii_uppercase();
        let token = upper
            .strip_prefix(CERT_PREFIX)?
            .strip_suffix(VALUE_SUFFIX)?;
        if token.is_empty() {
            return None;
        }
        Some(sanitize_serial(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_examples() {
        assert_eq!(sanitize_serial("0X1a-2B"), "X1A2B");
        assert_eq!(sanitize_serial("X1A2b"), "X1A2B");
        assert_eq!(sanitize_serial("00:1f:a3"), "1FA3");
        assert_eq!(sanitize_serial("0000"), "0");
        assert_eq!(sanitize_serial(""), "");
        assert_eq!(sanitize_serial("::"), "");
    }

    #[test]
    fn test_sanitize_is_a_fixed_point() {
        for input in [
            "0X1a-2B", "  7c 9e ", "000", "0-0-1", "abc", "", "0a", "ü0ber", "1F:00",
        ] {
            let once = sanitize_serial(input);
            assert_eq!(sanitize_serial(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn test_keys_share_the_sanitized_serial() {
        let keys = CertificateKeys::for_serial("0a:bc:01");
        assert_eq!(keys.serial, "ABC01");
        assert_eq!(keys.value, "CERT_ABC01_P12");
        assert_eq!(keys.password, "CERT_ABC01_PASSWORD");
        assert_eq!(keys.metadata, "CERT_ABC01_META");
        assert_eq!(CertificateKeys::for_serial("ABC01"), keys);
    }

    #[test]
    fn test_serial_from_value_key() {
        assert_eq!(
            CertificateKeys::serial_from_value_key("CERT_ABC01_P12").as_deref(),
            Some("ABC01")
        );
        assert_eq!(
            CertificateKeys::serial_from_value_key("cert_0abc01_p12").as_deref(),
            Some("ABC01")
        );
        assert_eq!(CertificateKeys::serial_from_value_key("CERT_ABC01_PASSWORD"), None);
        assert_eq!(CertificateKeys::serial_from_value_key("CERT__P12"), None);
        assert_eq!(CertificateKeys::serial_from_value_key("SECRET_X"), None);
    }
}
