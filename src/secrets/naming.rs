//! Key-name rules shared by the backends.
//!
//! Logical keys produced by certsync are already upper snake case, so these
//! sanitizers are the identity on them; they exist for user-chosen names
//! (managed secrets) and to keep each backend's character set honest.

/// Prefix for managed (non-certificate) secrets.
pub const MANAGED_PREFIX: &str = "SECRET_";

/// Uppercase ASCII alphanumerics and `_`, forced to start with a letter.
///
/// This is the strictest rule any backend imposes (Doppler-style env names).
pub fn upper_snake(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();

    if !out.starts_with(|c: char| c.is_ascii_alphabetic()) {
        out.insert_str(0, "S_");
    }
    out
}

/// Replace every character `allowed` rejects with `_` and cap the length.
pub fn restrict(name: &str, allowed: impl Fn(char) -> bool, max_len: usize) -> String {
    name.chars()
        .map(|c| if allowed(c) { c } else { '_' })
        .take(max_len)
        .collect()
}

/// Case-insensitive prefix filter over backend-native names.
pub fn filter_prefix(names: Vec<String>, prefix: Option<&str>) -> Vec<String> {
    match prefix {
        None | Some("") => names,
        Some(prefix) => {
            let prefix = prefix.to_ascii_uppercase();
            names
                .into_iter()
                .filter(|n| n.to_ascii_uppercase().starts_with(&prefix))
                .collect()
        }
    }
}

/// An auxiliary secret stored under a deterministic key derived from a
/// stable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedSecret {
    pub name: String,
    pub key: String,
}

impl ManagedSecret {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let body: String = name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        Self {
            key: format!("{}{}", MANAGED_PREFIX, body),
            name,
        }
    }

    /// Recover the name part from a listed key, if it is a managed key.
    pub fn name_from_key(key: &str) -> Option<String> {
        let upper = key.to_ascii_uppercase();
        upper
            .strip_prefix(MANAGED_PREFIX)
            .filter(|rest| !rest.is_empty())
            .map(|rest| rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_snake() {
        assert_eq!(upper_snake("db-password"), "DB_PASSWORD");
        assert_eq!(upper_snake("CERT_ABC_P12"), "CERT_ABC_P12");
        assert_eq!(upper_snake("1st key"), "S_1ST_KEY");
        assert_eq!(upper_snake("_x"), "S__X");
    }

    #[test]
    fn test_upper_snake_is_idempotent() {
        for input in ["a.b", "9lives", "ok", "__", "Ünïcode"] {
            let once = upper_snake(input);
            assert_eq!(upper_snake(&once), once);
        }
    }

    #[test]
    fn test_restrict() {
        let gcp = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
        assert_eq!(restrict("a.b/c", gcp, 255), "a_b_c");
        assert_eq!(restrict("abcdef", gcp, 3), "abc");
    }

    #[test]
    fn test_filter_prefix() {
        let names = vec!["CERT_A_P12".into(), "cert_b_p12".into(), "OTHER".into()];
        assert_eq!(filter_prefix(names.clone(), None).len(), 3);
        assert_eq!(
            filter_prefix(names, Some("CERT_")),
            vec!["CERT_A_P12".to_string(), "cert_b_p12".to_string()]
        );
    }

    #[test]
    fn test_managed_secret_key() {
        let secret = ManagedSecret::new("match git token");
        assert_eq!(secret.key, "SECRET_MATCH_GIT_TOKEN");
        assert_eq!(
            ManagedSecret::name_from_key(&secret.key).as_deref(),
            Some("MATCH_GIT_TOKEN")
        );
        assert_eq!(ManagedSecret::name_from_key("CERT_1_P12"), None);
    }
}
