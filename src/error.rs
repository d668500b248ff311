//! Unified error type for certsync.
//!
//! All public APIs return `Result<T, SyncError>`. Expected absence ("secret
//! not found", "no settings file yet") is modelled with `Option`, not with an
//! error variant; `NotFound` is reserved for lookups the caller required to
//! succeed.

use thiserror::Error;

/// The unified error type for all certsync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── I/O & serialization ────────────────────────────────────────────
    /// Filesystem or I/O operation failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// KDL config file parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    // ── Backends ───────────────────────────────────────────────────────
    /// An error originating from a secret backend (AWS, Vault, 1Password, ...).
    #[error("provider '{provider}': {message}")]
    Provider { provider: String, message: String },

    /// No secret backend is active.
    #[error("no secret backend configured")]
    NoBackend,

    /// A backend id was referenced that does not exist.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// A backend config is missing a setting its type requires.
    #[error("backend '{backend}' is missing required setting '{key}'")]
    MissingSetting { backend: String, key: String },

    // ── Crypto & keychain ──────────────────────────────────────────────
    /// Encryption or key derivation failed, or the envelope is malformed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// AEAD tag verification failed (wrong key, wrong password or tampering).
    #[error("authentication failed")]
    Authentication,

    /// The blob is not a certsync backup.
    #[error("not a certsync backup file")]
    InvalidBackup,

    /// The OS keychain refused or failed an operation.
    #[error("keychain error: {0}")]
    Keychain(String),

    // ── External commands ──────────────────────────────────────────────
    /// A subprocess (`security`, `op`) exited unsuccessfully.
    #[error("'{program}' failed: {message}")]
    Command { program: String, message: String },

    // ── Lookup & flow ──────────────────────────────────────────────────
    /// A requested secret, identity, or resource was not found.
    #[error("{0}")]
    NotFound(String),

    /// Feature is not supported by this backend or platform.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The operation was cancelled before it completed.
    #[error("cancelled")]
    Cancelled,

    /// User input validation failed.
    #[error("{0}")]
    Validation(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<String> for SyncError {
    fn from(s: String) -> Self {
        SyncError::Other(s)
    }
}

impl From<&str> for SyncError {
    fn from(s: &str) -> Self {
        SyncError::Other(s.to_string())
    }
}

impl From<keyring::Error> for SyncError {
    fn from(e: keyring::Error) -> Self {
        SyncError::Keychain(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            "request timed out".to_string()
        } else if e.is_connect() {
            "could not connect".to_string()
        } else {
            e.to_string()
        };
        SyncError::Provider {
            provider: "http".to_string(),
            message,
        }
    }
}

// ── Convenience constructors ───────────────────────────────────────────

impl SyncError {
    /// Create a provider-specific error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        SyncError::Encryption(message.into())
    }

    /// Create a keychain error.
    pub fn keychain(message: impl Into<String>) -> Self {
        SyncError::Keychain(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        SyncError::NotFound(message.into())
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        SyncError::Unsupported(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config(message.into())
    }

    /// Create an external-command error.
    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Command {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a provider error for AWS, translating common Secrets Manager
    /// errors into user-friendly messages.
    pub fn aws(e: impl std::fmt::Display) -> Self {
        let msg = e.to_string();

        let friendly = if msg.contains("ResourceNotFoundException") {
            "Secret not found (may have been deleted)".to_string()
        } else if msg.contains("AccessDeniedException") {
            "Access denied (check IAM permissions)".to_string()
        } else if msg.contains("InvalidParameterException") {
            "Invalid parameter".to_string()
        } else if msg.contains("InvalidRequestException") {
            "Invalid request (secret may be scheduled for deletion)".to_string()
        } else if msg.contains("DecryptionFailure") {
            "Decryption failed (KMS key issue)".to_string()
        } else if msg.contains("InternalServiceError") {
            "AWS internal error (try again later)".to_string()
        } else {
            msg
        };

        SyncError::Provider {
            provider: "aws".to_string(),
            message: friendly,
        }
    }

    /// Create a provider error for GCP, translating common Secret Manager
    /// errors into user-friendly messages.
    pub fn gcp(e: impl std::fmt::Display) -> Self {
        let msg = e.to_string();

        let friendly = if msg.contains("NOT_FOUND") || msg.contains("notFound") {
            "Secret not found".to_string()
        } else if msg.contains("PERMISSION_DENIED") || msg.contains("permissionDenied") {
            "Permission denied (check IAM roles for Secret Manager)".to_string()
        } else if msg.contains("ALREADY_EXISTS") || msg.contains("alreadyExists") {
            "Secret already exists".to_string()
        } else if msg.contains("UNAUTHENTICATED") || msg.contains("unauthenticated") {
            "Not authenticated (run 'gcloud auth application-default login')".to_string()
        } else if msg.contains("UNAVAILABLE") {
            "GCP service unavailable (try again later)".to_string()
        } else {
            msg
        };

        SyncError::Provider {
            provider: "gcp".to_string(),
            message: friendly,
        }
    }

    /// True for errors that mean "the remote object does not exist".
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::NotFound(_) => true,
            SyncError::Provider { message, .. } => {
                message.starts_with("Secret not found")
            }
            _ => false,
        }
    }
}

/// Convenience type alias for Results using SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;
